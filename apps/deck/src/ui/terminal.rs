//! Line-oriented terminal presenter: renders the deck and parses taps typed on stdin.

use std::{fmt::Write as _, io};

use shared::domain::TrackInfo;

use crate::controller::state::{DeckController, DeckState, Feedback};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    /// Zero-based index into the button grid.
    Button(usize),
    Tap(String),
    NowPlaying,
    Connect,
    Disconnect,
    Help,
    Quit,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if let Ok(number) = line.parse::<usize>() {
        return match number.checked_sub(1) {
            Some(index) => Input::Button(index),
            None => Input::Tap(line.to_string()),
        };
    }
    match line.to_ascii_lowercase().as_str() {
        "np" | "now" => Input::NowPlaying,
        "connect" | "retry" => Input::Connect,
        "disconnect" => Input::Disconnect,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Tap(line.to_string()),
    }
}

pub const HELP: &str =
    "Type a button number or command identifier; `np` now playing, `connect`, `disconnect`, `quit`.";

/// `M:SS`, as on the deck progress bar.
pub fn format_time(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub fn render_track(track: &TrackInfo) -> String {
    let artist = if track.artist.is_empty() {
        "Unknown Artist"
    } else {
        &track.artist
    };
    format!(
        "{} {} - {} [{} / {}]",
        if track.is_playing { "||" } else { ">" },
        track.name,
        artist,
        format_time(track.position_secs),
        format_time(track.duration_ms / 1000),
    )
}

pub fn render(controller: &DeckController) -> String {
    let mut out = String::new();
    let headline = match controller.state() {
        DeckState::Splash => "Remote Deck - starting".to_string(),
        DeckState::Connecting => "Remote Deck - connecting".to_string(),
        DeckState::Ready => "Remote Deck - online".to_string(),
        DeckState::Error { reason, attempt } => {
            format!("Remote Deck - OFFLINE (attempt {attempt}): {reason}")
        }
        DeckState::Disconnected => "Remote Deck - disconnected".to_string(),
    };
    let _ = writeln!(out, "== {headline} ==");
    let _ = writeln!(out, "status: {}", controller.status());

    if matches!(controller.state(), DeckState::Ready | DeckState::Error { .. }) {
        let dimmed = controller.state().is_degraded();
        for (row, pair) in controller.buttons().chunks(2).enumerate() {
            let cells: Vec<String> = pair
                .iter()
                .enumerate()
                .map(|(column, button)| {
                    let number = row * 2 + column + 1;
                    if dimmed {
                        format!("( {number:>2}) {:<14}", button.label)
                    } else {
                        format!("[{number:>2}] {:<14}", button.label)
                    }
                })
                .collect();
            let _ = writeln!(out, "  {}", cells.join(" ").trim_end());
        }
    }

    match controller.feedback() {
        Some(Feedback::Success { command, detail }) => match detail {
            Some(detail) => {
                let _ = writeln!(out, "ok: {command} ({detail})");
            }
            None => {
                let _ = writeln!(out, "ok: {command}");
            }
        },
        Some(Feedback::Failure { command, reason }) => {
            let _ = match command {
                Some(command) => writeln!(out, "failed: {command}: {reason}"),
                None => writeln!(out, "failed: {reason}"),
            };
        }
        None => {}
    }
    if let Some(track) = controller.now_playing() {
        let _ = writeln!(out, "now playing: {}", render_track(track));
    }
    if controller.discarded_taps() > 0 {
        let _ = writeln!(out, "ignored taps while offline: {}", controller.discarded_taps());
    }
    out
}

pub struct TerminalPresenter<W> {
    out: W,
    last_frame: String,
}

impl<W: io::Write> TerminalPresenter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_frame: String::new(),
        }
    }

    /// Redraws only when something visible changed.
    pub fn present(&mut self, controller: &DeckController) -> io::Result<()> {
        let frame = render(controller);
        if frame == self.last_frame {
            return Ok(());
        }
        self.out.write_all(frame.as_bytes())?;
        self.out.flush()?;
        self.last_frame = frame;
        Ok(())
    }

    pub fn message(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }
}
