use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest identifier accepted on the wire or in a vocabulary table.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// A fixed-vocabulary command identifier such as `OPEN_CHROME`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CommandId(pub(crate) String);

impl CommandId {
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidIdentifier> {
        let raw = raw.into();
        validate_identifier(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for CommandId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CommandId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommandId> for String {
    fn from(value: CommandId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier is {0} bytes, limit is {MAX_IDENTIFIER_LEN}")]
    TooLong(usize),
    #[error("identifier contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Identifiers are uppercase ASCII letters, digits and underscores.
pub fn validate_identifier(raw: &str) -> Result<(), InvalidIdentifier> {
    if raw.is_empty() {
        return Err(InvalidIdentifier::Empty);
    }
    if raw.len() > MAX_IDENTIFIER_LEN {
        return Err(InvalidIdentifier::TooLong(raw.len()));
    }
    if let Some(bad) = raw
        .chars()
        .find(|c| !(c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_'))
    {
        return Err(InvalidIdentifier::InvalidCharacter(bad));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandCategory {
    Launch,
    Media,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaSignal {
    PlayPause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
    Mute,
}

/// External process invocation. Arguments are passed verbatim, no shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg:?}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionDescriptor {
    /// Start an application and return once it has been spawned.
    Launch(Invocation),
    /// Deliver a media-control signal through the given invocation.
    Media {
        signal: MediaSignal,
        invocation: Invocation,
    },
    /// Run to completion; stdout is reported back to the client.
    Query(Invocation),
}

impl ActionDescriptor {
    pub fn category(&self) -> CommandCategory {
        match self {
            Self::Launch(_) => CommandCategory::Launch,
            Self::Media { .. } => CommandCategory::Media,
            Self::Query(_) => CommandCategory::Query,
        }
    }

    pub fn invocation(&self) -> &Invocation {
        match self {
            Self::Launch(invocation)
            | Self::Media { invocation, .. }
            | Self::Query(invocation) => invocation,
        }
    }
}

/// Now-playing snapshot carried in the `GET_TRACK_INFO` acknowledgement detail.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub duration_ms: u64,
    pub position_secs: u64,
    pub is_playing: bool,
}

impl TrackInfo {
    pub const PREFIX: &'static str = "TRACK:";

    /// Parses `TRACK:name|artist|album|duration_ms|position_s|is_playing`.
    /// Returns `None` for anything else, including the empty "nothing playing" record.
    pub fn parse(detail: &str) -> Option<Self> {
        let body = detail.trim().strip_prefix(Self::PREFIX)?;
        let fields: Vec<&str> = body.split('|').collect();
        if fields.len() < 6 || fields[0].is_empty() {
            return None;
        }
        // Player position comes back from AppleScript as a float.
        let position_secs = fields[4]
            .trim()
            .parse::<f64>()
            .ok()
            .map(|secs| secs.max(0.0) as u64)
            .unwrap_or_default();
        Some(Self {
            name: fields[0].to_string(),
            artist: fields[1].to_string(),
            album: fields[2].to_string(),
            duration_ms: fields[3].trim().parse().unwrap_or_default(),
            position_secs,
            is_playing: fields[5].trim().eq_ignore_ascii_case("true"),
        })
    }
}
