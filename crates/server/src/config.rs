use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use shared::{protocol::DEFAULT_PORT, vocabulary::Vocabulary};

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub bind_addr: String,
    pub vocabulary_path: Option<PathBuf>,
    pub action_timeout_ms: u64,
    pub session_idle_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            vocabulary_path: None,
            action_timeout_ms: 5_000,
            session_idle_timeout_secs: 60,
        }
    }
}

impl Settings {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms.max(1))
    }

    /// `None` when idle sessions are kept open forever.
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        (self.session_idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.session_idle_timeout_secs))
    }
}

/// Defaults, then `deck_server.toml` (or the explicit path), then `APP__*` env vars.
pub fn load_settings(config_path: Option<&Path>) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let mut builder = config::Config::builder()
        .set_default("bind_addr", defaults.bind_addr)?
        .set_default("action_timeout_ms", defaults.action_timeout_ms)?
        .set_default(
            "session_idle_timeout_secs",
            defaults.session_idle_timeout_secs,
        )?;

    builder = match config_path {
        Some(path) => builder.add_source(config::File::from(path).required(true)),
        None => builder.add_source(config::File::with_name("deck_server").required(false)),
    };

    builder
        .add_source(
            config::Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to assemble server configuration")?
        .try_deserialize()
        .context("invalid server configuration")
}

/// Accepts `host:port`, a bare port, or `:port` (all interfaces).
pub fn resolve_bind_addr(raw: &str) -> anyhow::Result<SocketAddr> {
    let raw = raw.trim();
    let port_only = raw.strip_prefix(':').unwrap_or(raw);
    if let Ok(port) = port_only.parse::<u16>() {
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    raw.parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address '{raw}'"))
}

pub fn load_vocabulary(path: Option<&Path>) -> anyhow::Result<Arc<Vocabulary>> {
    let vocabulary = match path {
        Some(path) => Vocabulary::load(path)
            .with_context(|| format!("failed to load vocabulary '{}'", path.display()))?,
        None => Vocabulary::builtin(),
    };
    anyhow::ensure!(!vocabulary.is_empty(), "command vocabulary is empty");
    Ok(Arc::new(vocabulary))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
