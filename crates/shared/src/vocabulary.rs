//! Command vocabulary: identifier -> action descriptor table.
//!
//! The table is built once at startup and shared read-only (`Arc<Vocabulary>`)
//! between the accept loop and session tasks. Adding a command is a table
//! entry, never a protocol change.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    domain::{
        ActionDescriptor, CommandCategory, CommandId, InvalidIdentifier, Invocation, MediaSignal,
    },
    protocol::PING,
};

#[derive(Debug, Error)]
#[error("unknown command {identifier:?}")]
pub struct UnknownCommand {
    pub identifier: String,
}

#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("invalid command identifier {identifier:?}: {source}")]
    InvalidIdentifier {
        identifier: String,
        source: InvalidIdentifier,
    },
    #[error("command {0} is reserved by the protocol")]
    Reserved(CommandId),
    #[error("command {0} registered twice")]
    Duplicate(CommandId),
    #[error("command {0}: media entries need a `signal`")]
    MissingSignal(CommandId),
    #[error("command {0}: `program` must not be empty")]
    EmptyProgram(CommandId),
    #[error("failed to read vocabulary file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse vocabulary table: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    entries: BTreeMap<CommandId, ActionDescriptor>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        identifier: &str,
        action: ActionDescriptor,
    ) -> Result<(), VocabularyError> {
        let id =
            CommandId::new(identifier).map_err(|source| VocabularyError::InvalidIdentifier {
                identifier: identifier.to_string(),
                source,
            })?;
        if id.as_str() == PING {
            return Err(VocabularyError::Reserved(id));
        }
        if action.invocation().program.trim().is_empty() {
            return Err(VocabularyError::EmptyProgram(id));
        }
        if self.entries.contains_key(&id) {
            return Err(VocabularyError::Duplicate(id));
        }
        self.entries.insert(id, action);
        Ok(())
    }

    /// Case-sensitive exact lookup.
    pub fn resolve(&self, identifier: &str) -> Result<&ActionDescriptor, UnknownCommand> {
        self.entries
            .get(identifier)
            .ok_or_else(|| UnknownCommand {
                identifier: identifier.to_string(),
            })
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &CommandId> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CommandId, &ActionDescriptor)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, VocabularyError> {
        let file: VocabularyFile = toml::from_str(raw)?;
        let mut vocabulary = Self::new();
        for entry in file.command {
            let id = CommandId::new(entry.id.clone()).map_err(|source| {
                VocabularyError::InvalidIdentifier {
                    identifier: entry.id.clone(),
                    source,
                }
            })?;
            let invocation = Invocation {
                program: entry.program,
                args: entry.args,
            };
            let action = match entry.category {
                CommandCategory::Launch => ActionDescriptor::Launch(invocation),
                CommandCategory::Query => ActionDescriptor::Query(invocation),
                CommandCategory::Media => ActionDescriptor::Media {
                    signal: entry.signal.ok_or(VocabularyError::MissingSignal(id))?,
                    invocation,
                },
            };
            vocabulary.register(&entry.id, action)?;
        }
        Ok(vocabulary)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, VocabularyError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| VocabularyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Default macOS table: `open -a` launches, AppleScript media controls.
    pub fn builtin() -> Self {
        let mut vocabulary = Self::new();
        for (id, app) in [
            ("OPEN_SPOTIFY", "Spotify"),
            ("OPEN_VSCODE", "Visual Studio Code"),
            ("OPEN_SAFARI", "Safari"),
            ("OPEN_TERMINAL", "Terminal"),
            ("OPEN_CHROME", "Google Chrome"),
        ] {
            vocabulary.entries.insert(
                builtin_id(id),
                ActionDescriptor::Launch(Invocation::new("open", ["-a", app])),
            );
        }
        for (id, signal, script) in [
            (
                "MEDIA_PLAY_PAUSE",
                MediaSignal::PlayPause,
                r#"tell application "Spotify" to playpause"#,
            ),
            (
                "MEDIA_NEXT",
                MediaSignal::Next,
                r#"tell application "Spotify" to next track"#,
            ),
            (
                "MEDIA_PREV",
                MediaSignal::Previous,
                r#"tell application "Spotify" to previous track"#,
            ),
            (
                "MEDIA_VOL_UP",
                MediaSignal::VolumeUp,
                "set volume output volume ((output volume of (get volume settings)) + 10)",
            ),
            (
                "MEDIA_VOL_DOWN",
                MediaSignal::VolumeDown,
                "set volume output volume ((output volume of (get volume settings)) - 10)",
            ),
            (
                "MEDIA_MUTE",
                MediaSignal::Mute,
                "set volume output muted not (output muted of (get volume settings))",
            ),
        ] {
            vocabulary.entries.insert(
                builtin_id(id),
                ActionDescriptor::Media {
                    signal,
                    invocation: Invocation::new("osascript", ["-e", script]),
                },
            );
        }
        vocabulary.entries.insert(
            builtin_id("GET_TRACK_INFO"),
            ActionDescriptor::Query(Invocation::new("osascript", ["-e", TRACK_INFO_SCRIPT])),
        );
        vocabulary
    }
}

fn builtin_id(raw: &'static str) -> CommandId {
    CommandId(raw.to_string())
}

const TRACK_INFO_SCRIPT: &str = r#"tell application "Spotify"
    if player state is playing or player state is paused then
        set trackName to name of current track
        set artistName to artist of current track
        set albumName to album of current track
        set trackDuration to duration of current track
        set playerPos to player position
        set isPlaying to (player state is playing)
        return "TRACK:" & trackName & "|" & artistName & "|" & albumName & "|" & trackDuration & "|" & playerPos & "|" & isPlaying
    else
        return "TRACK:|||0|0|false"
    end if
end tell"#;

#[derive(Debug, Deserialize)]
struct VocabularyFile {
    #[serde(default)]
    command: Vec<VocabularyEntry>,
}

#[derive(Debug, Deserialize)]
struct VocabularyEntry {
    id: String,
    category: CommandCategory,
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    signal: Option<MediaSignal>,
}

#[cfg(test)]
#[path = "tests/vocabulary_tests.rs"]
mod tests;
