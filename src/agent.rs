//! Agent context: the single owner of conversation state and the response
//! cycle.
//!
//! [`Agent::input`] is the entry point for every inbound frame:
//!
//! - `start` cancels and joins any running cycle, then accumulates;
//! - content (text or binary) accumulates;
//! - `end` runs the command interceptor and, unless the command was `stop`,
//!   starts a new response cycle.
//!
//! A chunk may carry several of these at once; they are handled in that
//! order.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::conversation::{intercept, lock_log, Command, ConversationLog, SharedLog};
use crate::delivery::Outbox;
use crate::driver::worker::{self, CycleContext};
use crate::driver::ResponseGenerator;
use crate::models::chunk::Frame;
use crate::models::cycle::{CycleStatus, ResponseCycle};
use crate::models::message::Message;
use crate::settings::{self, SharedSettings};
use crate::Result;

/// Handle to the worker running the current cycle.
struct Worker {
    cycle: Arc<Mutex<ResponseCycle>>,
    cancel: CancellationToken,
    handle: JoinHandle<CycleStatus>,
}

/// Conversational agent instance.
pub struct Agent {
    settings: SharedSettings,
    log: SharedLog,
    generator: Arc<dyn ResponseGenerator>,
    outbox: Outbox,
    worker: Option<Worker>,
    last_cycle: Option<ResponseCycle>,
}

impl Agent {
    /// Create an agent with an empty conversation log.
    #[must_use]
    pub fn new(
        settings: SharedSettings,
        generator: Arc<dyn ResponseGenerator>,
        outbox: Outbox,
    ) -> Self {
        Self {
            settings,
            log: Arc::new(Mutex::new(ConversationLog::new())),
            generator,
            outbox,
            worker: None,
            last_cycle: None,
        }
    }

    /// Shared settings cell.
    #[must_use]
    pub fn settings(&self) -> &SharedSettings {
        &self.settings
    }

    /// Shared conversation log.
    #[must_use]
    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    /// Snapshot of the conversation history.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        lock_log(&self.log).snapshot()
    }

    /// Whether a response cycle is currently running.
    #[must_use]
    pub fn is_responding(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// State of the current cycle, or of the most recent one.
    #[must_use]
    pub fn cycle(&self) -> Option<ResponseCycle> {
        match &self.worker {
            Some(worker) => Some(
                worker
                    .cycle
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone(),
            ),
            None => self.last_cycle.clone(),
        }
    }

    /// Feed one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if the frame cannot be accumulated (for
    /// example content before any `start`). The log is left unchanged and
    /// no cycle is started.
    pub async fn input(&mut self, frame: Frame) -> Result<()> {
        let chunk = match frame {
            Frame::Binary(bytes) => return self.accumulate(Frame::Binary(bytes)),
            Frame::Chunk(chunk) => chunk,
        };

        if chunk.start {
            self.stop().await;
        }

        let end = chunk.end;
        if chunk.start || chunk.content.is_some() {
            self.accumulate(Frame::Chunk(chunk))?;
        }

        if end {
            self.finish_turn().await;
        }
        Ok(())
    }

    /// Fold a frame into the log without triggering anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` on malformed or out-of-sequence frames.
    pub fn accumulate(&self, frame: Frame) -> Result<()> {
        lock_log(&self.log).accumulate(frame)
    }

    /// Start a response cycle, cancelling and joining any running one first.
    ///
    /// `run_code` overrides the `auto_run` setting for this cycle.
    pub async fn respond(&mut self, run_code: Option<bool>) {
        self.stop().await;

        let run_code = run_code.unwrap_or_else(|| settings::current(&self.settings).auto_run);
        let cycle = ResponseCycle::new(run_code);
        info!(cycle_id = %cycle.id, run_code, "starting response cycle");

        let cycle = Arc::new(Mutex::new(cycle));
        let cancel = CancellationToken::new();
        let ctx = CycleContext {
            cycle: Arc::clone(&cycle),
            generator: Arc::clone(&self.generator),
            log: Arc::clone(&self.log),
            outbox: self.outbox.clone(),
            cancel: cancel.clone(),
            settings: Arc::clone(&self.settings),
        };
        let handle = tokio::task::spawn_blocking(move || worker::run_cycle(ctx));

        self.worker = Some(Worker {
            cycle,
            cancel,
            handle,
        });
    }

    /// Cancel the running cycle and wait for its worker to unwind.
    ///
    /// A no-op returning `None` when nothing is running.
    pub async fn stop(&mut self) -> Option<CycleStatus> {
        let worker = self.worker.take()?;
        {
            let mut cycle = worker.cycle.lock().unwrap_or_else(PoisonError::into_inner);
            if cycle.transition(CycleStatus::Stopping) {
                debug!(cycle_id = %cycle.id, "stopping response cycle");
            }
        }
        worker.cancel.cancel();
        Some(self.reap(worker).await)
    }

    /// Wait for the running cycle to finish on its own.
    pub async fn wait(&mut self) -> Option<CycleStatus> {
        let worker = self.worker.take()?;
        Some(self.reap(worker).await)
    }

    /// Stop any cycle and clear the conversation log.
    pub async fn reset(&mut self) {
        self.stop().await;
        lock_log(&self.log).clear();
        info!("conversation reset");
    }

    async fn finish_turn(&mut self) {
        let command = intercept(&mut lock_log(&self.log));

        let run_code = match command {
            Some(Command::Stop) => {
                self.stop().await;
                return;
            }
            Some(Command::Go) => Some(true),
            Some(Command::Other(value)) => {
                debug!(command = %value, "ignoring unknown command");
                None
            }
            None => None,
        };

        self.respond(run_code).await;
    }

    async fn reap(&mut self, worker: Worker) -> CycleStatus {
        let status = match worker.handle.await {
            Ok(status) => status,
            Err(err) => {
                error!(%err, "response worker did not complete");
                CycleStatus::Failed
            }
        };
        let mut cycle = worker
            .cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        cycle.transition(status);
        self.last_cycle = Some(cycle);
        status
    }
}
