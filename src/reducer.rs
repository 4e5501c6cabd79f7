//! Reduction stage: merge all intermediate artifacts into the final output.
//!
//! The set of inputs is re-derived from disk after the first stage rather
//! than trusted from the scheduler, so a chunk whose merge failed can never
//! contribute a path that does not exist.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::artifact::ArtifactLayout;
use crate::config::ReducePolicy;
use crate::invoker::{CancelToken, MergeEngine, MergeTask, run_merge};
use crate::scheduler::StageOutcome;

/// What the reduction stage did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReduceOutcome {
    /// The final merge ran and succeeded.
    Merged {
        /// Number of intermediate artifacts merged.
        inputs: usize,
        /// The final document.
        output: PathBuf,
    },
    /// The final merge ran and failed.
    Failed {
        /// Number of intermediate artifacts handed to the engine.
        inputs: usize,
    },
    /// Skipped: the first stage failed and the policy is strict.
    SkippedStageFailed,
    /// Skipped: there were no chunks, so there is nothing to merge.
    NothingToMerge,
    /// Skipped: chunks were scheduled but none left an artifact behind.
    MissingArtifacts,
}

impl ReduceOutcome {
    /// Whether this outcome is compatible with a successful run.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Merged { .. } | Self::NothingToMerge)
    }

    /// The final document, if one was written.
    #[must_use]
    pub const fn final_output(&self) -> Option<&PathBuf> {
        match self {
            Self::Merged { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Intermediate artifacts for chunks `0..chunk_count` that exist on disk,
/// in chunk order, leaving out the chunks listed in `exclude`.
#[must_use]
pub fn existing_intermediates(
    layout: &ArtifactLayout,
    chunk_count: usize,
    exclude: &[usize],
) -> Vec<PathBuf> {
    (0..chunk_count)
        .filter(|i| !exclude.contains(i))
        .map(|i| layout.intermediate_path(i))
        .filter(|p| p.is_file())
        .collect()
}

/// Run the reduction stage.
///
/// `stage` is the first stage's outcome. Under [`ReducePolicy::Strict`] a
/// failed first stage skips reduction entirely; under
/// [`ReducePolicy::Lenient`] the finished artifacts are merged, and the run
/// still counts as failed. Artifacts of timed-out chunks are never read:
/// their merges may still be writing them.
#[tracing::instrument(skip(engine, layout, stage), fields(dir = %layout.dir().display()))]
pub fn reduce(
    engine: &dyn MergeEngine,
    layout: &ArtifactLayout,
    chunk_count: usize,
    stage: &StageOutcome,
    policy: ReducePolicy,
) -> ReduceOutcome {
    let stage_ok = stage.success();
    if chunk_count == 0 {
        warn!("no input files found; skipping final merge");
        return ReduceOutcome::NothingToMerge;
    }

    if !stage_ok && policy == ReducePolicy::Strict {
        warn!("first stage failed; skipping final merge (reduce policy is strict)");
        return ReduceOutcome::SkippedStageFailed;
    }

    if !stage.timed_out_chunks.is_empty() {
        warn!(
            chunks = ?stage.timed_out_chunks,
            "leaving out artifacts of timed-out chunks; their merges may still be running"
        );
    }
    let inputs = existing_intermediates(layout, chunk_count, &stage.timed_out_chunks);
    if inputs.is_empty() {
        error!(
            chunks = chunk_count,
            "no intermediate artifacts exist; nothing to merge into {}",
            layout.final_output().display()
        );
        return ReduceOutcome::MissingArtifacts;
    }
    if !stage_ok {
        warn!(
            present = inputs.len(),
            expected = chunk_count,
            "merging an incomplete set of intermediate artifacts; the final output is partial"
        );
    }

    let count = inputs.len();
    let task = MergeTask::reduction(inputs, layout.final_output());
    info!(inputs = count, output = %task.output.display(), "running final merge");
    if run_merge(engine, &task, &CancelToken::new()) {
        ReduceOutcome::Merged {
            inputs: count,
            output: task.output,
        }
    } else {
        ReduceOutcome::Failed { inputs: count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::InvokeError;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingEngine {
        fail: bool,
        calls: Mutex<Vec<(Vec<PathBuf>, PathBuf)>>,
    }

    impl MergeEngine for CapturingEngine {
        fn merge(
            &self,
            inputs: &[PathBuf],
            output: &Path,
            _cancel: &CancelToken,
        ) -> Result<(), InvokeError> {
            self.calls
                .lock()
                .unwrap()
                .push((inputs.to_vec(), output.to_path_buf()));
            if self.fail {
                return Err(InvokeError::Engine("boom".to_owned()));
            }
            std::fs::write(output, "<bom/>").map_err(|e| InvokeError::Engine(e.to_string()))
        }
    }

    fn ok_stage(total: usize) -> StageOutcome {
        StageOutcome {
            total,
            succeeded: total,
            ..StageOutcome::default()
        }
    }

    /// Chunk 1 failed, the rest succeeded.
    fn failed_stage(total: usize) -> StageOutcome {
        StageOutcome {
            total,
            succeeded: total - 1,
            failed: 1,
            ..StageOutcome::default()
        }
    }

    fn layout_with(dir: &Path, present: &[usize]) -> ArtifactLayout {
        let layout = ArtifactLayout::new(dir, None);
        for i in present {
            std::fs::write(layout.intermediate_path(*i), "<bom/>").unwrap();
        }
        layout
    }

    #[test]
    fn merges_all_present_artifacts_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[0, 1, 2]);
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 3, &ok_stage(3), ReducePolicy::Strict);

        assert!(outcome.success());
        assert_eq!(outcome.final_output(), Some(&layout.final_output()));
        let calls = engine.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, layout.intermediate_paths(3));
        assert!(layout.final_output().exists());
    }

    #[test]
    fn strict_policy_skips_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[0, 2]);
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 3, &failed_stage(3), ReducePolicy::Strict);

        assert_eq!(outcome, ReduceOutcome::SkippedStageFailed);
        assert!(!outcome.success());
        assert!(engine.calls.lock().unwrap().is_empty());
        assert!(!layout.final_output().exists());
    }

    #[test]
    fn lenient_policy_merges_only_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[0, 2]);
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 3, &failed_stage(3), ReducePolicy::Lenient);

        assert_eq!(outcome.final_output(), Some(&layout.final_output()));
        let calls = engine.calls.lock().unwrap();
        assert_eq!(
            calls[0].0,
            vec![layout.intermediate_path(0), layout.intermediate_path(2)]
        );
    }

    #[test]
    fn zero_chunks_is_nothing_to_merge() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[]);
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 0, &ok_stage(0), ReducePolicy::Strict);

        assert_eq!(outcome, ReduceOutcome::NothingToMerge);
        assert!(outcome.success());
        assert!(engine.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_artifacts_after_success_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[]);
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 2, &ok_stage(2), ReducePolicy::Strict);

        assert_eq!(outcome, ReduceOutcome::MissingArtifacts);
        assert!(!outcome.success());
    }

    #[test]
    fn failed_final_merge_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[0]);
        let engine = CapturingEngine {
            fail: true,
            ..CapturingEngine::default()
        };

        let outcome = reduce(&engine, &layout, 1, &ok_stage(1), ReducePolicy::Strict);

        assert_eq!(outcome, ReduceOutcome::Failed { inputs: 1 });
        assert!(!outcome.success());
    }

    #[test]
    fn existing_intermediates_ignores_other_runs() {
        let dir = tempfile::tempdir().unwrap();
        let scoped = ArtifactLayout::new(dir.path(), Some("b".to_owned()));
        layout_with(dir.path(), &[0, 1]);
        assert!(existing_intermediates(&scoped, 2, &[]).is_empty());
    }

    #[test]
    fn lenient_policy_leaves_out_timed_out_chunks() {
        let dir = tempfile::tempdir().unwrap();
        // Chunk 1's merge is still writing when the stage gives up on it.
        let layout = layout_with(dir.path(), &[0, 2]);
        std::fs::write(layout.intermediate_path(1), "<bom partial").unwrap();
        let stage = StageOutcome {
            total: 3,
            succeeded: 2,
            timed_out: 1,
            timed_out_chunks: vec![1],
            ..StageOutcome::default()
        };
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 3, &stage, ReducePolicy::Lenient);

        assert_eq!(outcome, ReduceOutcome::Merged {
            inputs: 2,
            output: layout.final_output(),
        });
        let calls = engine.calls.lock().unwrap();
        assert_eq!(
            calls[0].0,
            vec![layout.intermediate_path(0), layout.intermediate_path(2)]
        );
    }

    #[test]
    fn only_timed_out_artifacts_is_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_with(dir.path(), &[0]);
        let stage = StageOutcome {
            total: 1,
            timed_out: 1,
            timed_out_chunks: vec![0],
            ..StageOutcome::default()
        };
        let engine = CapturingEngine::default();

        let outcome = reduce(&engine, &layout, 1, &stage, ReducePolicy::Lenient);

        assert_eq!(outcome, ReduceOutcome::MissingArtifacts);
        assert!(engine.calls.lock().unwrap().is_empty());
    }
}
