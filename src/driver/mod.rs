//! Response driver.
//!
//! The [`ResponseGenerator`] trait decouples the relay from whatever
//! produces the agent's output (a language model, a code runner, a script).
//! [`worker::run_cycle`] drives one generator run on a blocking worker and
//! enforces the confirmation, cancellation, and termination rules.

pub mod process;
pub mod worker;

use tokio_util::sync::CancellationToken;

use crate::models::chunk::Chunk;
use crate::models::message::Message;
use crate::Result;

/// Lazy, finite, non-restartable sequence of produced chunks.
pub type ChunkStream = Box<dyn Iterator<Item = Result<Chunk>> + Send>;

/// Delegated response-generation collaborator.
///
/// Implementations may block (network or model calls); they are only ever
/// invoked from a blocking worker, never from the transport's event loop.
pub trait ResponseGenerator: Send + Sync {
    /// Start producing a response to `messages`.
    ///
    /// Implementations must emit a `confirmation` chunk immediately before
    /// any chunk whose execution needs approval, and should stop producing
    /// promptly once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Generation`](crate::AppError::Generation) if the
    /// response cannot be started.
    fn respond(
        &self,
        messages: &[Message],
        run_code: bool,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream>;
}
