use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use dispatch::{DispatchEngine, ShellExecutor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod session;

use config::{load_settings, load_vocabulary, resolve_bind_addr};
use session::{CommandServer, ServerOptions};

#[derive(Parser, Debug)]
#[command(name = "deck-server", about = "Executes remote deck commands on this host")]
struct Args {
    /// Settings file (defaults to ./deck_server.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, overrides the settings file.
    #[arg(long)]
    bind: Option<String>,
    /// TOML command vocabulary, overrides the built-in macOS table.
    #[arg(long)]
    vocabulary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(path) = args.vocabulary {
        settings.vocabulary_path = Some(path);
    }

    let vocabulary = load_vocabulary(settings.vocabulary_path.as_deref())?;
    let commands: Vec<&str> = vocabulary.identifiers().map(|id| id.as_str()).collect();
    info!(count = commands.len(), commands = %commands.join(", "), "command vocabulary loaded");

    let action_timeout = settings.action_timeout();
    let engine = DispatchEngine::new(
        Arc::clone(&vocabulary),
        Arc::new(ShellExecutor::new(action_timeout)),
    )
    .with_action_timeout(action_timeout);

    let addr = resolve_bind_addr(&settings.bind_addr)?;
    let server = CommandServer::bind(
        addr,
        engine,
        ServerOptions {
            idle_timeout: settings.session_idle_timeout(),
        },
    )
    .await
    .with_context(|| format!("failed to listen on {addr}"))?;
    info!(addr = %server.local_addr()?, "server listening");

    server
        .run(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(%err, "failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            info!("shutdown requested");
        })
        .await?;
    Ok(())
}
