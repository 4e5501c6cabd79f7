//! Progress reporting for the first merge stage.
//!
//! The scheduler tells a [`ProgressReporter`] how many tasks it is about to
//! wait on and bumps it as each one finishes. Reporters are passed in
//! explicitly so tests can observe progress without a terminal.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receives stage progress from the scheduler.
pub trait ProgressReporter: Send + Sync {
    /// A stage with `total` tasks is starting.
    fn start(&self, total: usize);

    /// One more task finished; `completed` of `total` are done.
    fn advance(&self, completed: usize, total: usize);

    /// The scheduler stopped waiting (all done, or timed out).
    fn finish(&self);
}

/// Reporter that discards all progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn start(&self, _total: usize) {}
    fn advance(&self, _completed: usize, _total: usize) {}
    fn finish(&self) {}
}

/// Terminal progress bar on stderr.
pub struct ProgressBarReporter {
    bar: ProgressBar,
}

impl ProgressBarReporter {
    #[must_use]
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        bar.set_style(
            ProgressStyle::with_template(
                "{msg} {bar:40.cyan/blue} {pos}/{len} chunk [{elapsed_precise}<{eta_precise}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message("Merging Files");
        Self { bar }
    }
}

impl Default for ProgressBarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for ProgressBarReporter {
    fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn advance(&self, completed: usize, _total: usize) {
        self.bar.set_position(completed as u64);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}
