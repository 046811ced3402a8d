use std::{path::Path, time::Duration};

use anyhow::Context;
use client_core::{ClientConfig, DEFAULT_HEARTBEAT_INTERVAL};
use serde::Deserialize;
use shared::protocol::DEFAULT_PORT;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeckButton {
    pub label: String,
    pub command: String,
}

impl DeckButton {
    fn new(label: &str, command: &str) -> Self {
        Self {
            label: label.to_string(),
            command: command.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DeckSettings {
    pub server_addr: String,
    pub splash_duration_ms: u64,
    pub connect_timeout_ms: u64,
    pub ack_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// 0 disables heartbeats.
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_buttons")]
    pub buttons: Vec<DeckButton>,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            splash_duration_ms: 2_000,
            connect_timeout_ms: 2_000,
            ack_timeout_ms: 3_000,
            backoff_initial_ms: 500,
            backoff_max_ms: 10_000,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL.as_secs(),
            buttons: default_buttons(),
        }
    }
}

impl DeckSettings {
    pub fn splash_duration(&self) -> Duration {
        Duration::from_millis(self.splash_duration_ms)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms.max(1)),
            ack_timeout: Duration::from_millis(self.ack_timeout_ms.max(1)),
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            heartbeat_interval: (self.heartbeat_interval_secs > 0)
                .then(|| Duration::from_secs(self.heartbeat_interval_secs)),
            ..ClientConfig::new(self.server_addr.clone())
        }
    }
}

/// The deck's button grid: app launchers first, then the media row.
pub fn default_buttons() -> Vec<DeckButton> {
    vec![
        DeckButton::new("Spotify", "OPEN_SPOTIFY"),
        DeckButton::new("VS Code", "OPEN_VSCODE"),
        DeckButton::new("Safari", "OPEN_SAFARI"),
        DeckButton::new("Terminal", "OPEN_TERMINAL"),
        DeckButton::new("Chrome", "OPEN_CHROME"),
        DeckButton::new("Prev", "MEDIA_PREV"),
        DeckButton::new("Play/Pause", "MEDIA_PLAY_PAUSE"),
        DeckButton::new("Next", "MEDIA_NEXT"),
        DeckButton::new("Vol -", "MEDIA_VOL_DOWN"),
        DeckButton::new("Vol +", "MEDIA_VOL_UP"),
        DeckButton::new("Mute", "MEDIA_MUTE"),
    ]
}

/// Defaults, then `deck.toml` (or the explicit path), then `APP__*` env vars.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<DeckSettings> {
    let defaults = DeckSettings::default();
    let mut builder = config::Config::builder()
        .set_default("server_addr", defaults.server_addr)?
        .set_default("splash_duration_ms", defaults.splash_duration_ms)?
        .set_default("connect_timeout_ms", defaults.connect_timeout_ms)?
        .set_default("ack_timeout_ms", defaults.ack_timeout_ms)?
        .set_default("backoff_initial_ms", defaults.backoff_initial_ms)?
        .set_default("backoff_max_ms", defaults.backoff_max_ms)?
        .set_default("heartbeat_interval_secs", defaults.heartbeat_interval_secs)?;

    builder = match config_path {
        Some(path) => builder.add_source(config::File::from(path).required(true)),
        None => builder.add_source(config::File::with_name("deck").required(false)),
    };

    builder
        .add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to assemble deck configuration")?
        .try_deserialize()
        .context("invalid deck configuration")
}
