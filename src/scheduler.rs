//! Bounded worker pool for first-stage merges.
//!
//! [`BatchScheduler::run`] feeds every task into a shared queue consumed by
//! at most `threads` named worker threads. Each worker runs one blocking
//! merge at a time, so at most `threads` engine processes exist at once and
//! excess tasks wait in the queue. The calling thread collects outcomes in
//! completion order, which is unspecified.
//!
//! # Failure semantics
//!
//! - A failed task never stops its siblings; every queued task is attempted.
//! - The stage succeeds only if every task succeeded.
//! - With a timeout configured, the scheduler stops waiting once the
//!   deadline passes. Tasks still pending count as timed out, the shared
//!   [`CancelToken`] is cancelled so queued tasks are never started, and the
//!   workers are detached. Whether an already running engine process is
//!   killed is up to the engine.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::invoker::{CancelToken, MergeEngine, MergeTask, TaskKind, run_merge};
use crate::progress::ProgressReporter;

// ---------------------------------------------------------------------------
// StageOutcome
// ---------------------------------------------------------------------------

/// Aggregate result of one scheduled stage.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    /// Tasks handed to the scheduler.
    pub total: usize,
    /// Tasks whose merge succeeded.
    pub succeeded: usize,
    /// Tasks whose merge failed (or whose worker died).
    pub failed: usize,
    /// Tasks still pending when the wait ceiling passed.
    pub timed_out: usize,
    /// Chunk indices of the timed-out tasks, ascending. Their merges may
    /// still be running and writing their artifacts.
    pub timed_out_chunks: Vec<usize>,
}

impl StageOutcome {
    /// `true` iff every task succeeded. An empty stage succeeds.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.succeeded == self.total
    }
}

// ---------------------------------------------------------------------------
// BatchScheduler
// ---------------------------------------------------------------------------

/// Runs merge tasks on a fixed number of worker threads.
#[derive(Clone, Copy, Debug)]
pub struct BatchScheduler {
    threads: NonZeroUsize,
    timeout: Option<Duration>,
}

type Completion = (usize, bool);

impl BatchScheduler {
    /// Scheduler with `threads` workers and no wait ceiling.
    #[must_use]
    pub const fn new(threads: NonZeroUsize) -> Self {
        Self {
            threads,
            timeout: None,
        }
    }

    /// Set the maximum time to wait for the whole stage.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run every task and wait for all of them (or the deadline).
    #[tracing::instrument(skip_all, fields(tasks = tasks.len(), threads = self.threads.get()))]
    pub fn run(
        &self,
        tasks: Vec<MergeTask>,
        engine: &Arc<dyn MergeEngine>,
        reporter: &dyn ProgressReporter,
    ) -> StageOutcome {
        let total = tasks.len();
        let mut outcome = StageOutcome {
            total,
            ..StageOutcome::default()
        };
        if total == 0 {
            return outcome;
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        let cancel = CancelToken::new();
        let (task_tx, task_rx) = unbounded::<(usize, MergeTask)>();
        let (done_tx, done_rx) = unbounded::<Completion>();

        let labels: Vec<TaskKind> = tasks.iter().map(|t| t.kind).collect();
        for slot_task in tasks.into_iter().enumerate() {
            // Cannot fail: `task_rx` is still alive.
            let _ = task_tx.send(slot_task);
        }
        drop(task_tx);

        let workers = self.spawn_workers(total, &task_rx, &done_tx, engine, &cancel);
        drop(task_rx);
        drop(done_tx);

        reporter.start(total);
        let mut pending: BTreeSet<usize> = (0..total).collect();
        let mut gave_up = false;

        while !pending.is_empty() {
            let received = match deadline {
                Some(d) => done_rx.recv_deadline(d),
                None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((slot, ok)) => {
                    pending.remove(&slot);
                    if ok {
                        outcome.succeeded += 1;
                    } else {
                        outcome.failed += 1;
                    }
                    reporter.advance(total - pending.len(), total);
                }
                Err(RecvTimeoutError::Timeout) => {
                    cancel.cancel();
                    for slot in &pending {
                        error!(task = %labels[*slot], "Processing timed out for {}", labels[*slot]);
                    }
                    outcome.timed_out = pending.len();
                    outcome.timed_out_chunks = pending
                        .iter()
                        .filter_map(|slot| match labels[*slot] {
                            TaskKind::Chunk(i) => Some(i),
                            TaskKind::Reduction => None,
                        })
                        .collect();
                    gave_up = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    for slot in &pending {
                        error!(task = %labels[*slot], "{} never reported back: no merge worker left", labels[*slot]);
                    }
                    outcome.failed += pending.len();
                    break;
                }
            }
        }
        reporter.finish();

        if gave_up {
            warn!(
                pending = outcome.timed_out,
                "stopped waiting after batch timeout; running merges are left to finish on their own"
            );
        } else {
            for handle in workers {
                if handle.join().is_err() {
                    error!("merge worker panicked");
                }
            }
        }

        debug!(?outcome, "stage finished");
        outcome
    }

    fn spawn_workers(
        &self,
        total: usize,
        task_rx: &Receiver<(usize, MergeTask)>,
        done_tx: &Sender<Completion>,
        engine: &Arc<dyn MergeEngine>,
        cancel: &CancelToken,
    ) -> Vec<JoinHandle<()>> {
        let count = self.threads.get().min(total);
        let mut handles = Vec::with_capacity(count);
        for worker_idx in 0..count {
            let rx = task_rx.clone();
            let tx = done_tx.clone();
            let engine = Arc::clone(engine);
            let cancel = cancel.clone();

            let spawned = thread::Builder::new()
                .name(format!("merge-worker-{worker_idx}"))
                .spawn(move || {
                    for (slot, task) in rx.iter() {
                        if cancel.is_cancelled() {
                            break;
                        }
                        let ok = run_merge(engine.as_ref(), &task, &cancel);
                        if tx.send((slot, ok)).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(worker = worker_idx, "failed to spawn merge worker: {e}"),
            }
        }
        handles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
