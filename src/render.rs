//! Console echo of produced chunks.
//!
//! Code and console chunks with a format are framed by a ruled code fence
//! when they start and end. `active_line` chunks only move the live cursor
//! upstream and are never printed.

use std::io::Write;

use tracing::debug;

use crate::models::chunk::{Chunk, ChunkType, Content};

const RULE: &str = "------------";

/// Text printed for `chunk`.
#[must_use]
pub fn render_chunk(chunk: &Chunk) -> String {
    let mut out = String::new();
    if chunk.start {
        out.push_str("\n\n");
    }

    let fenced = matches!(chunk.kind, Some(ChunkType::Code | ChunkType::Console));
    let format = chunk.format.as_deref().filter(|_| fenced);

    if let Some(format) = format {
        if chunk.start {
            out.push_str(&format!("\n{RULE}\n\n```{format}\n"));
        }
    }

    if !chunk.is_active_line() {
        match &chunk.content {
            Some(Content::Text(text)) => out.push_str(text),
            Some(Content::Binary(bytes)) => out.push_str(&format!("<{} bytes>", bytes.len())),
            None => {}
        }
    }

    if format.is_some() && chunk.end {
        out.push_str(&format!("\n```\n\n{RULE}\n\n\n"));
    }
    out
}

/// Write the rendered chunk to stdout and flush.
pub fn echo(chunk: &Chunk) {
    let rendered = render_chunk(chunk);
    if rendered.is_empty() {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    // Console echo is best effort; a closed stdout must not fail the cycle.
    if let Err(err) = stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
    {
        debug!(%err, "console echo failed");
    }
}
