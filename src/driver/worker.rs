//! Response cycle worker.
//!
//! Runs on a blocking thread (one per cycle, at most one at a time). For
//! each chunk the generator produces, in order:
//!
//! 1. `confirmation` chunks are consumed once when `run_code` is set, and
//!    otherwise end the cycle as [`CycleStatus::Denied`].
//! 2. If cancellation was requested the worker returns quietly: nothing more
//!    is emitted, not even the completion sentinel. This also holds when the
//!    generator reacts to cancellation by ending its stream or failing.
//! 3. The chunk is pushed to the [`Outbox`] and then recorded in the
//!    conversation log.
//!
//! Exhaustion emits the completion sentinel. Generator errors and panics
//! emit an error chunk followed by the sentinel.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::conversation::{lock_log, SharedLog};
use crate::delivery::Outbox;
use crate::driver::ResponseGenerator;
use crate::models::chunk::{Chunk, ChunkType};
use crate::models::cycle::{CycleStatus, ResponseCycle};
use crate::render;
use crate::settings::{self, SharedSettings};
use crate::Result;

/// Everything one response cycle needs, moved onto the worker thread.
pub struct CycleContext {
    /// Cycle state shared with the agent.
    pub cycle: Arc<Mutex<ResponseCycle>>,
    /// Delegated generator.
    pub generator: Arc<dyn ResponseGenerator>,
    /// Conversation history; the worker records its own output here.
    pub log: SharedLog,
    /// Delivery channel producer.
    pub outbox: Outbox,
    /// Cooperative cancellation flag, polled after every produced chunk.
    pub cancel: CancellationToken,
    /// Live settings (console echo).
    pub settings: SharedSettings,
}

/// Run one cycle to termination and return its final status.
///
/// Never panics: generator panics are caught and reported like errors.
#[must_use]
pub fn run_cycle(ctx: CycleContext) -> CycleStatus {
    let (cycle_id, run_code) = {
        let cycle = ctx.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        (cycle.id.clone(), cycle.run_code)
    };
    let span = info_span!("response_cycle", cycle_id = %cycle_id, run_code);
    let _guard = span.enter();

    let status = match panic::catch_unwind(AssertUnwindSafe(|| drive(&ctx, run_code))) {
        Ok(Ok(status)) => status,
        Ok(Err(err)) => {
            error!(%err, "response generation failed");
            ctx.outbox.put_failure(err.to_string());
            CycleStatus::Failed
        }
        Err(payload) => {
            let diagnostic = panic_message(payload.as_ref());
            error!(%diagnostic, "response generator panicked");
            ctx.outbox.put_failure(format!("generation: {diagnostic}"));
            CycleStatus::Failed
        }
    };

    ctx.cycle
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .transition(status);
    info!(?status, "response cycle finished");
    status
}

fn drive(ctx: &CycleContext, mut run_code: bool) -> Result<CycleStatus> {
    let history = lock_log(&ctx.log).snapshot();
    let stream = ctx.generator.respond(&history, run_code, &ctx.cancel)?;

    for item in stream {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) if ctx.cancel.is_cancelled() => {
                debug!(%err, "generator failed after cancellation; stopping quietly");
                return Ok(CycleStatus::Cancelled);
            }
            Err(err) => return Err(err),
        };

        if chunk.kind == Some(ChunkType::Confirmation) {
            if run_code {
                debug!("confirmation auto-approved");
                run_code = false;
                continue;
            }
            if ctx.cancel.is_cancelled() {
                return Ok(CycleStatus::Cancelled);
            }
            info!("confirmation required but run_code is off; stopping cycle");
            ctx.outbox.put(Chunk::complete());
            return Ok(CycleStatus::Denied);
        }

        if ctx.cancel.is_cancelled() {
            debug!("cancellation observed; stopping quietly");
            return Ok(CycleStatus::Cancelled);
        }

        if settings::current(&ctx.settings).print_output {
            render::echo(&chunk);
        }

        ctx.outbox.put(chunk.clone());
        if let Err(err) = lock_log(&ctx.log).record_output(&chunk) {
            warn!(%err, "failed to record produced chunk in conversation log");
        }
    }

    if ctx.cancel.is_cancelled() {
        debug!("generator ended after cancellation; no sentinel");
        return Ok(CycleStatus::Cancelled);
    }

    ctx.outbox.put(Chunk::complete());
    Ok(CycleStatus::Completed)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "response generator panicked".to_owned()
    }
}
