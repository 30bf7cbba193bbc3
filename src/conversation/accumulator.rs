//! Message accumulator.
//!
//! Folds a stream of [`Frame`]s into the ordered [`ConversationLog`]. The
//! decision between appending to the last message and opening a new one is
//! made purely on structural fields (`start`, `type`, `format`), because the
//! first chunks of a message are often "type-less" until content resolves
//! what they are.
//!
//! | Frame                                        | Effect                          |
//! |----------------------------------------------|---------------------------------|
//! | `format == "active_line"`                    | Discarded                       |
//! | content, no `start`, compatible with last    | Appended to the last message    |
//! | `start`, or `type`/`format` differs          | New message opened              |
//! | raw binary                                   | Appended to the last message    |

use tracing::trace;

use crate::models::chunk::{Chunk, Content, Frame};
use crate::models::message::Message;
use crate::{AppError, Result};

/// Ordered conversation history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages in order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of logical messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log has no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent message.
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Owned copy of the history for readers outside the lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Drop every message.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub(crate) fn pop(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    /// Fold one inbound frame into the log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when content arrives before any message
    /// was opened, or when text and binary content would be mixed.
    pub fn accumulate(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Chunk(chunk) => self.accumulate_chunk(chunk),
            Frame::Binary(bytes) => self.accumulate_binary(bytes),
        }
    }

    /// Record a chunk the agent produced itself.
    ///
    /// Output chunks rarely carry `start` markers, so a change of role
    /// relative to the last message opens a new message. Pure boundary
    /// chunks (an `end` with no content) leave the log untouched.
    ///
    /// # Errors
    ///
    /// Same as [`accumulate`](Self::accumulate).
    pub fn record_output(&mut self, chunk: &Chunk) -> Result<()> {
        if chunk.content.is_none() && !chunk.start {
            return Ok(());
        }
        let role_changed = self.last().map_or(true, |last| last.role != chunk.role);
        let mut chunk = chunk.clone();
        chunk.start |= role_changed;
        chunk.end = false;
        self.accumulate_chunk(chunk)
    }

    fn accumulate_chunk(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.is_active_line() {
            trace!("discarding active_line chunk");
            return Ok(());
        }

        let compatible = self.last().map_or(true, |last| is_compatible(last, &chunk));

        if chunk.content.is_some() && !chunk.start && compatible {
            let Some(last) = self.messages.last_mut() else {
                return Err(AppError::Protocol(
                    "send a chunk with start: true before any content".into(),
                ));
            };
            if last.kind.is_none() {
                last.kind = chunk.kind;
            }
            if last.format.is_none() && chunk.format.is_some() {
                last.format = chunk.format;
            }
            match (&mut last.content, chunk.content) {
                (Some(existing), Some(more)) => existing.append(more)?,
                (slot, more) => *slot = more,
            }
            return Ok(());
        }

        if chunk.start || !compatible {
            self.messages.push(Message::open(chunk));
        }
        Ok(())
    }

    fn accumulate_binary(&mut self, bytes: Vec<u8>) -> Result<()> {
        let Some(last) = self.messages.last_mut() else {
            return Err(AppError::Protocol(
                "binary frame received before any message was started".into(),
            ));
        };
        match last.content.as_mut() {
            Some(existing) => existing.append(Content::Binary(bytes)),
            None => {
                last.content = Some(Content::Binary(bytes));
                Ok(())
            }
        }
    }
}

/// A chunk continues `message` unless both define a `type` or a `format`
/// and those values differ.
fn is_compatible(message: &Message, chunk: &Chunk) -> bool {
    let same_type = match (message.kind, chunk.kind) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    };
    let same_format = match (message.format.as_deref(), chunk.format.as_deref()) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    };
    same_type && same_format
}
