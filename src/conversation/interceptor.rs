//! Command interceptor.
//!
//! When an `end` marker closes a message of type `command`, the message is
//! removed from the log (commands never become conversation history) and
//! its content decoded into a [`Command`].

use tracing::debug;

use crate::conversation::accumulator::ConversationLog;
use crate::models::chunk::{ChunkType, Content};

/// In-band control command carried by a `command` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Cancel the active response cycle and do not start another.
    Stop,
    /// Approve the next pending code-execution confirmation.
    Go,
    /// Anything else; accepted and ignored.
    Other(String),
}

impl Command {
    /// Decode command text. Matching is exact.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text {
            "stop" => Self::Stop,
            "go" => Self::Go,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Pop the last message if it is a command and decode it.
///
/// Returns `None` and leaves the log untouched when the last message is not
/// a command (or the log is empty).
pub fn intercept(log: &mut ConversationLog) -> Option<Command> {
    if log.last()?.kind != Some(ChunkType::Command) {
        return None;
    }
    let message = log.pop()?;
    let command = match message.content {
        Some(Content::Text(text)) => Command::parse(&text),
        Some(Content::Binary(bytes)) => Command::parse(&String::from_utf8_lossy(&bytes)),
        None => Command::Other(String::new()),
    };
    debug!(?command, "intercepted command message");
    Some(command)
}
