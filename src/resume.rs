//! Resume support: skip chunks whose intermediate artifact already exists.
//!
//! Presence is decided by existence alone. A partially written or stale
//! artifact is indistinguishable from a valid one and will be reused; delete
//! it (or pick a new run id) to force the chunk to be merged again.

use tracing::{debug, info};

use crate::artifact::ArtifactLayout;
use crate::chunk::Chunk;
use crate::invoker::MergeTask;

/// Chunks split by whether their artifact still has to be produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResumePlan {
    /// Chunks whose artifact is absent, as tasks ready to schedule.
    pub to_run: Vec<MergeTask>,
    /// Indices of chunks whose artifact is already present.
    pub skipped: Vec<usize>,
}

/// Pair each chunk with its artifact path and drop the ones already done.
#[must_use]
pub fn plan_resume(chunks: Vec<Chunk>, layout: &ArtifactLayout) -> ResumePlan {
    let mut plan = ResumePlan::default();
    for chunk in chunks {
        let index = chunk.index();
        let output = layout.intermediate_path(index);
        if output.exists() {
            debug!(chunk = index, artifact = %output.display(), "artifact present; skipping");
            plan.skipped.push(index);
        } else {
            plan.to_run.push(MergeTask::chunk(index, chunk.into_files(), output));
        }
    }
    if !plan.skipped.is_empty() {
        info!(
            skipped = plan.skipped.len(),
            remaining = plan.to_run.len(),
            "resuming: reusing existing intermediate artifacts"
        );
    }
    plan
}
