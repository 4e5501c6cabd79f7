//! Run summary.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::Serialize;

use crate::reducer::ReduceOutcome;
use crate::scheduler::StageOutcome;

/// What a merge run did, for display and `--format json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Directory inputs were read from and artifacts written to.
    pub work_dir: PathBuf,
    /// Input files discovered.
    pub input_files: usize,
    /// Chunks the inputs were split into.
    pub chunks: usize,
    /// Chunks skipped because their artifact already existed.
    pub skipped: usize,
    /// First-stage results for the chunks that were scheduled.
    pub stage: StageOutcome,
    /// What the reduction stage did.
    pub reduction: ReduceOutcome,
    /// `true` iff every scheduled merge and the final merge succeeded.
    pub success: bool,
}

impl RunReport {
    /// The final merged document, if one was written.
    #[must_use]
    pub const fn final_output(&self) -> Option<&PathBuf> {
        self.reduction.final_output()
    }

    /// Human-readable multi-line summary.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} input file(s) in {} chunk(s), {} reused from a previous run",
            self.input_files, self.chunks, self.skipped
        );
        let _ = writeln!(
            out,
            "chunks merged: {} succeeded, {} failed, {} timed out",
            self.stage.succeeded, self.stage.failed, self.stage.timed_out
        );
        let reduction = match &self.reduction {
            ReduceOutcome::Merged { inputs, output } => {
                format!("final merge of {inputs} artifact(s) written to {}", output.display())
            }
            ReduceOutcome::Failed { inputs } => {
                format!("final merge of {inputs} artifact(s) failed")
            }
            ReduceOutcome::SkippedStageFailed => {
                "final merge skipped: some chunks did not merge".to_owned()
            }
            ReduceOutcome::NothingToMerge => "final merge skipped: no input files".to_owned(),
            ReduceOutcome::MissingArtifacts => {
                "final merge skipped: no intermediate artifacts on disk".to_owned()
            }
        };
        let _ = writeln!(out, "{reduction}");
        out
    }
}
