//! Merge invocation: the unit of work submitted to the worker pool.
//!
//! A [`MergeEngine`] merges a list of input documents into one output file.
//! The production engine, [`CycloneDxCli`], shells out to the `cyclonedx`
//! CLI:
//!
//! ```text
//! cyclonedx merge --input-files <f1> <f2> ... --output-file <out>
//! ```
//!
//! The engine's standard output is discarded; standard error is captured so
//! a failure can be logged with the engine's own explanation. Success is
//! decided by exit status alone.
//!
//! [`run_merge`] wraps one engine call for a [`MergeTask`], logs any failure
//! against the task's output path, and reduces the result to a boolean. There
//! is no retry.
//!
//! # Cancellation
//!
//! Every call receives a [`CancelToken`]. A cancelled token stops a task from
//! starting. Killing an already running process is opt-in
//! (`kill_on_cancel`); by default a cancelled call simply runs to completion
//! while nobody waits for it.

use std::fmt;
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::config::EngineConfig;

/// How much of the engine's stderr is kept for the error message.
const STDERR_LIMIT: usize = 4096;

// ---------------------------------------------------------------------------
// MergeTask
// ---------------------------------------------------------------------------

/// Which stage a task belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// First-stage merge of one chunk.
    Chunk(usize),
    /// Final merge of all intermediate artifacts.
    Reduction,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chunk(i) => write!(f, "chunk {i}"),
            Self::Reduction => write!(f, "reduction"),
        }
    }
}

/// One merge: a set of input documents and the file they merge into.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTask {
    /// Stage and chunk index.
    pub kind: TaskKind,
    /// Input documents, in merge order.
    pub inputs: Vec<PathBuf>,
    /// Where the merged document is written.
    pub output: PathBuf,
}

impl MergeTask {
    /// First-stage task for chunk `index`.
    #[must_use]
    pub const fn chunk(index: usize, inputs: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            kind: TaskKind::Chunk(index),
            inputs,
            output,
        }
    }

    /// Reduction task over `inputs`.
    #[must_use]
    pub const fn reduction(inputs: Vec<PathBuf>, output: PathBuf) -> Self {
        Self {
            kind: TaskKind::Reduction,
            inputs,
            output,
        }
    }
}

// ---------------------------------------------------------------------------
// CancelToken
// ---------------------------------------------------------------------------

/// Shared flag telling in-flight and queued merges that nobody is waiting.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// InvokeError
// ---------------------------------------------------------------------------

/// Why a merge call failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvokeError {
    /// The engine process could not be started.
    Spawn {
        /// Program that was run.
        program: String,
        /// OS error text.
        detail: String,
    },
    /// The engine exited with a non-zero status.
    Exit {
        /// Exit code, if the process was not killed by a signal.
        code: Option<i32>,
        /// Captured standard error (truncated).
        stderr: String,
    },
    /// Waiting on the engine process failed.
    Wait(String),
    /// The token was cancelled before the merge started.
    Cancelled,
    /// The engine was killed after the token was cancelled.
    Killed,
    /// An in-process engine reported an error.
    Engine(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, detail } => {
                write!(f, "failed to start '{program}': {detail}")
            }
            Self::Exit { code, stderr } => {
                match code {
                    Some(c) => write!(f, "merge engine exited with code {c}")?,
                    None => write!(f, "merge engine terminated by signal")?,
                }
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::Wait(msg) => write!(f, "failed to wait for merge engine: {msg}"),
            Self::Cancelled => write!(f, "cancelled before start"),
            Self::Killed => write!(f, "killed after cancellation"),
            Self::Engine(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for InvokeError {}

// ---------------------------------------------------------------------------
// MergeEngine
// ---------------------------------------------------------------------------

/// Something that merges SBOM documents.
///
/// Implementations must be callable from several worker threads at once.
/// Each call writes only to its own `output`.
pub trait MergeEngine: Send + Sync {
    /// Merge `inputs` into `output`.
    ///
    /// # Errors
    /// Returns [`InvokeError`] when the merge did not complete successfully.
    fn merge(&self, inputs: &[PathBuf], output: &Path, cancel: &CancelToken)
    -> Result<(), InvokeError>;
}

/// The `cyclonedx` command-line tool as a [`MergeEngine`].
#[derive(Clone, Debug)]
pub struct CycloneDxCli {
    program: String,
    args: Vec<String>,
    kill_on_cancel: bool,
    poll_interval: Duration,
}

impl CycloneDxCli {
    /// Engine running `program args... --input-files ... --output-file ...`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            kill_on_cancel: false,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Engine built from the `[engine]` config section.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone()).kill_on_cancel(config.kill_on_cancel)
    }

    /// Kill the running process once the token is cancelled.
    #[must_use]
    pub fn kill_on_cancel(mut self, enabled: bool) -> Self {
        self.kill_on_cancel = enabled;
        self
    }

    /// The command that merges `inputs` into `output`.
    #[must_use]
    pub fn command(&self, inputs: &[PathBuf], output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--input-files")
            .args(inputs)
            .arg("--output-file")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    /// Poll the child until it exits, killing it if the token is cancelled.
    fn wait_or_kill(&self, child: &mut Child, cancel: &CancelToken) -> Result<ExitStatus, InvokeError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if cancel.is_cancelled() {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(InvokeError::Killed);
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(e) => return Err(InvokeError::Wait(e.to_string())),
            }
        }
    }
}

impl Default for CycloneDxCli {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl MergeEngine for CycloneDxCli {
    fn merge(
        &self,
        inputs: &[PathBuf],
        output: &Path,
        cancel: &CancelToken,
    ) -> Result<(), InvokeError> {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }

        let mut child = self
            .command(inputs, output)
            .spawn()
            .map_err(|e| InvokeError::Spawn {
                program: self.program.clone(),
                detail: e.to_string(),
            })?;

        // Drain stderr on its own thread so a chatty engine cannot block on a
        // full pipe while we wait for it.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let status = if self.kill_on_cancel {
            self.wait_or_kill(&mut child, cancel)
        } else {
            child.wait().map_err(|e| InvokeError::Wait(e.to_string()))
        };

        // On a kill, grandchildren may still hold the pipe open; leave the
        // reader behind rather than block on it.
        let status = status?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(InvokeError::Exit {
                code: status.code(),
                stderr: truncate(stderr.trim(), STDERR_LIMIT),
            })
        }
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_owned();
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

// ---------------------------------------------------------------------------
// run_merge
// ---------------------------------------------------------------------------

/// Run one merge task to completion and report whether it succeeded.
///
/// Failures are logged at error level with the task's output path.
pub fn run_merge(engine: &dyn MergeEngine, task: &MergeTask, cancel: &CancelToken) -> bool {
    debug!(
        task = %task.kind,
        inputs = task.inputs.len(),
        output = %task.output.display(),
        "merging"
    );
    match engine.merge(&task.inputs, &task.output, cancel) {
        Ok(()) => true,
        Err(InvokeError::Cancelled) => {
            debug!(task = %task.kind, "not started: batch already timed out");
            false
        }
        Err(e) => {
            error!(
                task = %task.kind,
                output = %task.output.display(),
                "Error in merging files into {}: {e}",
                task.output.display()
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
