#![forbid(unsafe_code)]

//! Streaming chunk relay for a conversational code agent.
//!
//! Inbound chunks are folded into a conversation log; an `end` marker
//! starts a cancellable response cycle whose output is delivered back to
//! the peer in order, optionally with per-chunk acknowledgment.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod delivery;
pub mod driver;
pub mod errors;
pub mod models;
pub mod render;
pub mod server;
pub mod settings;

pub use agent::Agent;
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
