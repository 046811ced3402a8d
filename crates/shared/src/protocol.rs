//! Line-delimited plaintext wire protocol.
//!
//! Each frame is one UTF-8 line ending in `\n`. Client frames carry a single
//! command identifier; server frames carry one acknowledgement:
//!
//! ```text
//! > OPEN_CHROME
//! < OK
//! > OPEN_FOO
//! < ERROR: unknown command
//! > GET_TRACK_INFO
//! < OK: TRACK:Song|Artist|Album|215000|42.5|true
//! ```

use std::{fmt, io};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::{validate_identifier, CommandId, InvalidIdentifier};

pub const DEFAULT_PORT: u16 = 9999;
/// Longest line accepted from the peer, delimiter excluded.
pub const MAX_FRAME_LEN: usize = 1024;
/// Reserved heartbeat identifier, answered without consulting the vocabulary.
pub const PING: &str = "PING";
pub const PONG: &str = "PONG";

const OK_TAG: &str = "OK";
const ERROR_TAG: &str = "ERROR";

/// Encoded form always fits in [`MAX_FRAME_LEN`]; longer details and
/// reasons are cut at a char boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Ok {
        detail: Option<String>,
    },
    Error {
        reason: String,
    },
}

impl Acknowledgement {
    pub fn ok() -> Self {
        Self::Ok { detail: None }
    }

    pub fn ok_with(detail: impl Into<String>) -> Self {
        let detail = fit_frame(single_line(detail.into()), OK_TAG.len() + 2);
        Self::Ok {
            detail: (!detail.is_empty()).then_some(detail),
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: fit_frame(single_line(reason.into()), ERROR_TAG.len() + 2),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Ok { detail } => detail.as_deref(),
            Self::Error { .. } => None,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let line = strip_line_ending(line);
        if line == OK_TAG {
            return Ok(Self::ok());
        }
        if let Some(detail) = line.strip_prefix("OK:") {
            return Ok(Self::ok_with(detail.trim()));
        }
        if line == ERROR_TAG {
            return Ok(Self::error(String::new()));
        }
        if let Some(reason) = line.strip_prefix("ERROR:") {
            return Ok(Self::error(reason.trim()));
        }
        Err(FrameError::UnrecognizedAcknowledgement(line.to_string()))
    }
}

impl fmt::Display for Acknowledgement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok { detail: None } => f.write_str(OK_TAG),
            Self::Ok {
                detail: Some(detail),
            } => write!(f, "{OK_TAG}: {detail}"),
            Self::Error { reason } => write!(f, "{ERROR_TAG}: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed command frame: {0}")]
    Command(#[from] InvalidIdentifier),
    #[error("unrecognized acknowledgement frame {0:?}")]
    UnrecognizedAcknowledgement(String),
}

/// Parses one inbound client line into a command identifier.
pub fn parse_command_frame(line: &str) -> Result<CommandId, FrameError> {
    let line = strip_line_ending(line);
    validate_identifier(line)?;
    Ok(CommandId::new(line)?)
}

pub fn encode_command_frame(command: &CommandId) -> String {
    format!("{command}\n")
}

/// One unit read off the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Line(String),
    /// Line longer than [`MAX_FRAME_LEN`]; its bytes were discarded.
    Oversized,
    /// Line that was not valid UTF-8.
    InvalidUtf8,
    /// Peer closed the stream. A trailing partial line is discarded.
    Closed,
}

pub async fn read_frame<R>(reader: &mut R) -> io::Result<InboundFrame>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_FRAME_LEN as u64 + 2)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(InboundFrame::Closed);
    }
    if buf.last() != Some(&b'\n') {
        if buf.len() <= MAX_FRAME_LEN + 1 {
            return Ok(InboundFrame::Closed);
        }
        if discard_line(reader).await? {
            return Ok(InboundFrame::Oversized);
        }
        return Ok(InboundFrame::Closed);
    }
    buf.pop();
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    if buf.len() > MAX_FRAME_LEN {
        return Ok(InboundFrame::Oversized);
    }
    match String::from_utf8(buf) {
        Ok(line) => Ok(InboundFrame::Line(line)),
        Err(_) => Ok(InboundFrame::InvalidUtf8),
    }
}

/// Consumes bytes up to and including the next newline. Returns `false`
/// when the stream ended first.
async fn discard_line<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let mut scratch = Vec::with_capacity(MAX_FRAME_LEN);
    loop {
        scratch.clear();
        let read = (&mut *reader)
            .take(MAX_FRAME_LEN as u64)
            .read_until(b'\n', &mut scratch)
            .await?;
        if read == 0 {
            return Ok(false);
        }
        if scratch.last() == Some(&b'\n') {
            return Ok(true);
        }
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    writer.flush().await
}

pub async fn write_acknowledgement<W>(writer: &mut W, ack: &Acknowledgement) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_line(writer, &ack.encode()).await
}

fn strip_line_ending(line: &str) -> &str {
    line.trim_end_matches(['\n', '\r'])
}

fn single_line(text: String) -> String {
    if text.contains(['\n', '\r']) {
        text.split(['\n', '\r'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        text.trim().to_string()
    }
}

/// Truncates `text` so that `prefix_len` bytes of tag plus `text` fit in one frame.
fn fit_frame(mut text: String, prefix_len: usize) -> String {
    let budget = MAX_FRAME_LEN - prefix_len;
    if text.len() <= budget {
        return text;
    }
    let mut end = budget;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.trim_end().to_string()
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
