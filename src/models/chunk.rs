//! Chunk model: the smallest wire-transmissible fragment of a message.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Format tag used for live cursor hints; never stored in the log.
pub const ACTIVE_LINE_FORMAT: &str = "active_line";

/// Content of the completion sentinel emitted at the end of every cycle.
pub const COMPLETE_CONTENT: &str = "complete";

/// Who produced a chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human on the other end of the transport.
    User,
    /// The language model.
    Assistant,
    /// The code-execution backend.
    Computer,
    /// This relay.
    Server,
}

/// Kind of payload a chunk carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// Natural-language text.
    Message,
    /// Generated source code.
    Code,
    /// Output of executed code.
    Console,
    /// In-band control command (`stop`, `go`).
    Command,
    /// Image payload (base64 text or a path).
    Image,
    /// Approval gate before a side-effecting action.
    Confirmation,
    /// Lifecycle status from the server.
    Status,
    /// Diagnostic text describing a failure.
    Error,
}

impl ChunkType {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Code => "code",
            Self::Console => "console",
            Self::Command => "command",
            Self::Image => "image",
            Self::Confirmation => "confirmation",
            Self::Status => "status",
            Self::Error => "error",
        }
    }
}

/// Chunk or message content: UTF-8 text or a raw binary payload.
///
/// The two representations never mix. An empty text value is the initial
/// placeholder of a freshly opened message and may be replaced by binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Content {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes (arrive as binary websocket frames).
    Binary(Vec<u8>),
}

impl Content {
    /// Borrow the text, if this is textual content.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Whether this is the empty-string placeholder.
    #[must_use]
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Self::Text(text) if text.is_empty())
    }

    /// Concatenate `other` onto this content.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when the representations differ, except
    /// for the empty-text placeholder, which becomes an empty binary buffer
    /// before the bytes are appended.
    pub fn append(&mut self, other: Content) -> Result<()> {
        if self.is_empty_text() && matches!(other, Self::Binary(_)) {
            *self = other;
            return Ok(());
        }
        match (self, other) {
            (Self::Text(existing), Self::Text(more)) => existing.push_str(&more),
            (Self::Binary(existing), Self::Binary(more)) => existing.extend_from_slice(&more),
            (Self::Text(_), Self::Binary(_)) => {
                return Err(AppError::Protocol(
                    "cannot append binary content to a text message".into(),
                ))
            }
            (Self::Binary(_), Self::Text(_)) => {
                return Err(AppError::Protocol(
                    "cannot append text content to a binary message".into(),
                ))
            }
        }
        Ok(())
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

fn text_content<'de, D>(deserializer: D) -> std::result::Result<Option<Content>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(Content::Text))
}

/// A typed, partially-ordered fragment of a logical message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Producer of the chunk.
    pub role: Role,
    /// Payload kind; absent on "type-less" chunks.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ChunkType>,
    /// Free-form format tag (`output`, `active_line`, `base64.png`, `python`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Text or binary payload. On the wire only text is accepted; binary
    /// arrives as envelope-less frames.
    #[serde(
        default,
        deserialize_with = "text_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Content>,
    /// Begins a new logical message.
    #[serde(default, skip_serializing_if = "is_false")]
    pub start: bool,
    /// Closes the current logical message and triggers a response.
    #[serde(default, skip_serializing_if = "is_false")]
    pub end: bool,
    /// Delivery identifier attached in acknowledgment mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Chunk {
    /// Create an empty chunk for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            role,
            kind: None,
            format: None,
            content: None,
            start: false,
            end: false,
            id: None,
        }
    }

    /// Set the chunk type.
    #[must_use]
    pub fn with_type(mut self, kind: ChunkType) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the format tag.
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set the content.
    #[must_use]
    pub fn with_content(mut self, content: impl Into<Content>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Mark the chunk as the start of a logical message.
    #[must_use]
    pub fn starting(mut self) -> Self {
        self.start = true;
        self
    }

    /// Mark the chunk as the end of a logical message.
    #[must_use]
    pub fn ending(mut self) -> Self {
        self.end = true;
        self
    }

    /// The `{role: server, type: status, content: "complete"}` sentinel.
    #[must_use]
    pub fn complete() -> Self {
        Self::new(Role::Server)
            .with_type(ChunkType::Status)
            .with_content(COMPLETE_CONTENT)
    }

    /// A server error chunk carrying diagnostic text.
    #[must_use]
    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self::new(Role::Server)
            .with_type(ChunkType::Error)
            .with_content(diagnostic.into())
    }

    /// Whether this is the completion sentinel.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.role == Role::Server
            && self.kind == Some(ChunkType::Status)
            && self.content.as_ref().and_then(Content::as_text) == Some(COMPLETE_CONTENT)
    }

    /// Whether the chunk only hints at the live cursor position.
    #[must_use]
    pub fn is_active_line(&self) -> bool {
        self.format.as_deref() == Some(ACTIVE_LINE_FORMAT)
    }
}

/// A unit travelling through the relay: a JSON chunk or a raw binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Enveloped chunk.
    Chunk(Chunk),
    /// Envelope-less bytes extending the current open message.
    Binary(Vec<u8>),
}

impl Frame {
    /// Parse a JSON text frame into a chunk frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the text is not a valid chunk.
    pub fn parse_text(text: &str) -> Result<Self> {
        Ok(Self::Chunk(serde_json::from_str(text)?))
    }
}

impl From<Chunk> for Frame {
    fn from(chunk: Chunk) -> Self {
        Self::Chunk(chunk)
    }
}

/// Any text message a peer may send over the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `{"auth": "<key>"}` handshake.
    Auth(Option<String>),
    /// `{"ack": "<id>"}` delivery acknowledgment.
    Ack(String),
    /// A conversational chunk.
    Chunk(Chunk),
}

impl Inbound {
    /// Classify a JSON text frame as a control message or a chunk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the text is not JSON, or is neither a
    /// control message nor a valid chunk.
    pub fn from_text(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if let Some(auth) = value.get("auth") {
            return Ok(Self::Auth(auth.as_str().map(str::to_owned)));
        }
        if let Some(ack) = value.get("ack") {
            let id = match ack {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            return Ok(Self::Ack(id));
        }
        Ok(Self::Chunk(serde_json::from_value(value)?))
    }
}
