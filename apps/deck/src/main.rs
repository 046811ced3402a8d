use std::{
    io::{self, BufRead},
    path::PathBuf,
    thread,
    time::Instant,
};

mod backend_bridge;
mod config;
mod controller;
mod ui;

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use tracing_subscriber::EnvFilter;

use backend_bridge::commands::BackendCommand;
use controller::{
    events::UiEvent, orchestration::dispatch_backend_command, state::DeckController,
};
use ui::terminal::{parse_input, Input, TerminalPresenter, HELP};

#[derive(Parser, Debug)]
#[command(name = "deck", about = "Remote control deck for a deck-server host")]
struct Args {
    /// Settings file (defaults to ./deck.toml when present).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Server address, `host` or `host:port`; overrides the settings file.
    #[arg(long)]
    server: Option<String>,
    /// Splash screen duration in milliseconds.
    #[arg(long)]
    splash_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    // stdout belongs to the presenter; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = config::load_settings(args.config.as_deref())?;
    if let Some(server) = args.server {
        settings.server_addr = server;
    }
    if let Some(splash_ms) = args.splash_ms {
        settings.splash_duration_ms = splash_ms;
    }

    let (cmd_tx, cmd_rx) = bounded::<BackendCommand>(64);
    let (ui_tx, ui_rx) = bounded::<UiEvent>(256);
    let backend = backend_bridge::runtime::launch(settings.client_config(), cmd_rx, ui_tx)
        .context("failed to start backend worker")?;
    let input_rx = spawn_input_thread()?;

    let mut controller = DeckController::new(settings.buttons.clone());
    let mut presenter = TerminalPresenter::new(io::stdout());
    presenter.present(&controller)?;
    presenter.message(HELP)?;

    run_event_loop(
        &mut controller,
        &mut presenter,
        &cmd_tx,
        &ui_rx,
        &input_rx,
        after(settings.splash_duration()),
    )?;

    let _ = cmd_tx.try_send(BackendCommand::Shutdown);
    drop(cmd_tx);
    if backend.join().is_err() {
        tracing::error!("backend worker panicked");
    }
    Ok(())
}

fn run_event_loop<W: io::Write>(
    controller: &mut DeckController,
    presenter: &mut TerminalPresenter<W>,
    cmd_tx: &Sender<BackendCommand>,
    ui_rx: &Receiver<UiEvent>,
    input_rx: &Receiver<String>,
    splash: Receiver<Instant>,
) -> anyhow::Result<()> {
    let mut splash = Some(splash);
    loop {
        let splash_rx = splash.clone().unwrap_or_else(never);
        select! {
            recv(splash_rx) -> _ => {
                splash = None;
                if let Some(cmd) = controller.finish_splash() {
                    dispatch_backend_command(cmd_tx, cmd, controller.status_mut());
                }
            }
            recv(ui_rx) -> event => match event {
                Ok(event) => controller.apply(event),
                Err(_) => {
                    presenter.message("backend worker stopped")?;
                    return Ok(());
                }
            },
            recv(input_rx) -> line => {
                let Ok(line) = line else {
                    // stdin closed
                    return Ok(());
                };
                let cmd = match parse_input(&line) {
                    Input::Empty => None,
                    Input::Button(index) => controller.tap_button(index),
                    Input::Tap(command) => controller.tap(&command),
                    Input::NowPlaying => controller.request_now_playing(),
                    Input::Connect => controller.request_connect(),
                    Input::Disconnect => controller.request_disconnect(),
                    Input::Help => {
                        presenter.message(HELP)?;
                        None
                    }
                    Input::Quit => return Ok(()),
                };
                if let Some(cmd) = cmd {
                    dispatch_backend_command(cmd_tx, cmd, controller.status_mut());
                }
            }
        }
        presenter.present(controller)?;
    }
}

fn spawn_input_thread() -> anyhow::Result<Receiver<String>> {
    let (input_tx, input_rx) = bounded::<String>(64);
    thread::Builder::new()
        .name("deck-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                if input_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("failed to start input thread")?;
    Ok(input_rx)
}
