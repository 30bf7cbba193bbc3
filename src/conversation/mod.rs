//! Conversation history: chunk accumulation and command interception.

pub mod accumulator;
pub mod interceptor;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use accumulator::ConversationLog;
pub use interceptor::{intercept, Command};

/// Conversation log shared between the agent and the active cycle's worker.
///
/// The lock is held only for a single accumulate/snapshot, never across a
/// generator call.
pub type SharedLog = Arc<Mutex<ConversationLog>>;

/// Lock the shared log, recovering the data if a holder panicked.
pub fn lock_log(log: &SharedLog) -> MutexGuard<'_, ConversationLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}
