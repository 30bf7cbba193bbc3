//! Logical message: a coalesced unit of conversation history.

use serde::{Deserialize, Serialize};

use crate::models::chunk::{Chunk, ChunkType, Content, Role};

/// One entry of the conversation log, assembled from one or more chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Producer of the message.
    pub role: Role,
    /// Payload kind; backfilled lazily from later chunks when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkType>,
    /// Format tag; backfilled lazily from later chunks when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Accumulated content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
}

impl Message {
    /// Open a message from its first chunk, dropping boundary markers and
    /// defaulting the content to the empty-string placeholder.
    #[must_use]
    pub fn open(chunk: Chunk) -> Self {
        Self {
            role: chunk.role,
            kind: chunk.kind,
            format: chunk.format,
            content: Some(chunk.content.unwrap_or_else(|| Content::Text(String::new()))),
        }
    }

    /// Text content, if the message is textual.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Content::as_text)
    }
}
