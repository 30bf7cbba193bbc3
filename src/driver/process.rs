//! Process-backed response generator.
//!
//! Spawns the configured program once per response cycle. The request is
//! written to the child's stdin as a single JSON line:
//!
//! ```json
//! {"messages": [ ... ], "run_code": false}
//! ```
//!
//! and stdin is closed. The child answers with newline-delimited JSON
//! chunks on stdout, one per line. Blank lines are skipped. The child is
//! killed when the stream is dropped or cancellation is observed; a watcher
//! thread does the latter so a child blocked mid-response cannot stall
//! `stop`.

use std::io::{BufRead, BufReader, Lines, Write};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::driver::{ChunkStream, ResponseGenerator};
use crate::models::chunk::Chunk;
use crate::models::message::Message;
use crate::{AppError, Result};

/// Request body written to the generator's stdin.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    messages: &'a [Message],
    run_code: bool,
}

/// Generator that delegates to an external program speaking NDJSON chunks.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    command: String,
    args: Vec<String>,
}

impl ProcessGenerator {
    /// Create a generator for `command` with `args`.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Create a generator from the `[generator]` config section.
    #[must_use]
    pub fn from_config(config: &GeneratorConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

impl ResponseGenerator for ProcessGenerator {
    fn respond(
        &self,
        messages: &[Message],
        run_code: bool,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                AppError::Generation(format!("failed to spawn {}: {err}", self.command))
            })?;

        info!(
            pid = child.id(),
            command = %self.command,
            messages = messages.len(),
            "generator process spawned"
        );

        let mut request = serde_json::to_vec(&GenerateRequest { messages, run_code })
            .map_err(|err| AppError::Generation(format!("failed to encode request: {err}")))?;
        request.push(b'\n');

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut stream = ProcessChunks {
            child: Arc::new(Mutex::new(child)),
            lines: None,
            cancel: cancel.clone(),
            done: false,
            finished: Arc::new(AtomicBool::new(false)),
        };

        let mut stdin =
            stdin.ok_or_else(|| AppError::Generation("generator stdin unavailable".into()))?;
        stdin
            .write_all(&request)
            .map_err(|err| AppError::Generation(format!("failed to write request: {err}")))?;
        drop(stdin);

        let stdout =
            stdout.ok_or_else(|| AppError::Generation("generator stdout unavailable".into()))?;
        stream.lines = Some(BufReader::new(stdout).lines());
        stream.watch_cancellation();
        Ok(Box::new(stream))
    }
}

/// Pause between cancellation checks of the watcher thread.
const WATCH_INTERVAL: Duration = Duration::from_millis(10);

/// Chunk iterator over a running generator process.
struct ProcessChunks {
    child: Arc<Mutex<Child>>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    cancel: CancellationToken,
    done: bool,
    finished: Arc<AtomicBool>,
}

impl ProcessChunks {
    /// Kill the child as soon as `cancel` fires, unblocking a pending read.
    fn watch_cancellation(&self) {
        let child = Arc::clone(&self.child);
        let cancel = self.cancel.clone();
        let finished = Arc::clone(&self.finished);
        thread::spawn(move || {
            while !finished.load(Ordering::Acquire) {
                if cancel.is_cancelled() {
                    kill_running(&child);
                    return;
                }
                thread::sleep(WATCH_INTERVAL);
            }
        });
    }

    fn finish(&mut self) -> Option<Result<Chunk>> {
        self.done = true;
        let status = loop {
            let polled = self
                .child
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .try_wait();
            match polled {
                Ok(Some(status)) => break Ok(status),
                Err(err) => break Err(err),
                Ok(None) if self.cancel.is_cancelled() => {
                    kill_running(&self.child);
                    break Err(std::io::Error::other("killed after cancellation"));
                }
                Ok(None) => thread::sleep(WATCH_INTERVAL),
            }
        };
        self.finished.store(true, Ordering::Release);

        if self.cancel.is_cancelled() {
            debug!("generator process ended after cancellation");
            return None;
        }
        match status {
            Ok(status) if status.success() => {
                debug!("generator process exited cleanly");
                None
            }
            Ok(status) => Some(Err(AppError::Generation(format!(
                "generator process exited with {status}"
            )))),
            Err(err) => Some(Err(AppError::Generation(format!(
                "failed to wait for generator process: {err}"
            )))),
        }
    }
}

fn kill_running(child: &Mutex<Child>) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Ok(None) = child.try_wait() {
        if let Err(err) = child.kill() {
            warn!(%err, "failed to kill generator process");
        }
        if let Err(err) = child.wait() {
            debug!(%err, "failed to reap generator process");
        }
    }
}

impl Iterator for ProcessChunks {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.cancel.is_cancelled() {
            self.done = true;
            return None;
        }

        loop {
            let line = match self.lines.as_mut()?.next() {
                None => return self.finish(),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(AppError::Generation(format!(
                        "failed to read generator output: {err}"
                    ))));
                }
                Some(Ok(line)) => line,
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str::<Chunk>(&line).map_err(|err| {
                AppError::Generation(format!("invalid chunk from generator: {err}"))
            }));
        }
    }
}

impl Drop for ProcessChunks {
    fn drop(&mut self) {
        self.finished.store(true, Ordering::Release);
        kill_running(&self.child);
    }
}
