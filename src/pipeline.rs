//! End-to-end merge run.
//!
//! ```text
//! InputSource ──prepare──▶ work dir ──discover──▶ files ──split──▶ chunks
//!     ──plan_resume──▶ tasks ──BatchScheduler──▶ intermediates ──reduce──▶ final_merged.xml
//! ```
//!
//! Configuration and the input path are checked before anything touches the
//! filesystem. From then on no task-level failure aborts the run; the
//! outcome is reported through [`RunReport::success`] and error logs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

use crate::artifact::ArtifactLayout;
use crate::chunk::split_into_chunks;
use crate::config::MergeConfig;
use crate::discovery::discover_inputs;
use crate::error::MergeError;
use crate::extract::extract_archive;
use crate::invoker::MergeEngine;
use crate::progress::ProgressReporter;
use crate::reducer::reduce;
use crate::report::RunReport;
use crate::resume::plan_resume;
use crate::scheduler::BatchScheduler;

// ---------------------------------------------------------------------------
// InputSource
// ---------------------------------------------------------------------------

/// Where the SBOM fragments come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputSource {
    /// A directory of XML files; artifacts are written into it.
    Directory(PathBuf),
    /// A zip archive, expanded next to itself before merging.
    Archive(PathBuf),
}

impl InputSource {
    /// The path as given.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(p) | Self::Archive(p) => p,
        }
    }

    /// Check the path and return the directory the run works in.
    ///
    /// Archives are extracted here.
    ///
    /// # Errors
    /// Returns [`MergeError`] if the path is missing or of the wrong kind, or
    /// extraction fails.
    pub fn prepare(&self) -> Result<PathBuf, MergeError> {
        let path = self.path();
        if !path.exists() {
            return Err(MergeError::InputNotFound {
                path: path.to_owned(),
            });
        }
        match self {
            Self::Directory(dir) => {
                if !dir.is_dir() {
                    return Err(MergeError::NotADirectory { path: dir.clone() });
                }
                Ok(dir.clone())
            }
            Self::Archive(archive) => {
                if !archive.is_file() {
                    return Err(MergeError::NotAFile {
                        path: archive.clone(),
                    });
                }
                Ok(extract_archive(archive)?)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A configured merge run.
pub struct Pipeline<'a> {
    config: &'a MergeConfig,
    engine: Arc<dyn MergeEngine>,
    reporter: &'a dyn ProgressReporter,
}

impl<'a> Pipeline<'a> {
    /// Run with `config`, merging through `engine` and reporting chunk
    /// progress to `reporter`.
    #[must_use]
    pub fn new(
        config: &'a MergeConfig,
        engine: Arc<dyn MergeEngine>,
        reporter: &'a dyn ProgressReporter,
    ) -> Self {
        Self {
            config,
            engine,
            reporter,
        }
    }

    /// Validate the config, prepare `source`, and run.
    ///
    /// # Errors
    /// See [`InputSource::prepare`] and [`Pipeline::run`].
    pub fn run_source(&self, source: &InputSource) -> Result<RunReport, MergeError> {
        self.config.validate()?;
        let work_dir = source.prepare()?;
        self.run_validated(&work_dir)
    }

    /// Merge every input in `work_dir` into `work_dir/final_merged.xml`.
    ///
    /// Validates the config first; use this when the directory is already
    /// prepared.
    ///
    /// # Errors
    /// Returns [`MergeError`] only for problems found before any merge is
    /// scheduled: invalid configuration or an unreadable directory.
    pub fn run(&self, work_dir: &Path) -> Result<RunReport, MergeError> {
        self.config.validate()?;
        self.run_validated(work_dir)
    }

    #[tracing::instrument(skip(self, work_dir), fields(work_dir = %work_dir.display()))]
    fn run_validated(&self, work_dir: &Path) -> Result<RunReport, MergeError> {
        let chunk_size = self.config.batch.chunk_size()?;
        let threads = self.config.batch.threads()?;

        let files = discover_inputs(work_dir, &self.config.discovery.pattern)?;
        let chunks = split_into_chunks(&files, chunk_size);
        let chunk_count = chunks.len();
        info!(
            files = files.len(),
            chunks = chunk_count,
            chunk_size = chunk_size.get(),
            "partitioned inputs"
        );

        let layout = ArtifactLayout::new(work_dir, self.config.artifacts.run_id.clone());
        let plan = plan_resume(chunks, &layout);
        let skipped = plan.skipped.len();

        let stage = BatchScheduler::new(threads)
            .with_timeout(self.config.batch.timeout())
            .run(plan.to_run, &self.engine, self.reporter);
        if !stage.success() {
            error!(
                failed = stage.failed,
                timed_out = stage.timed_out,
                "{} of {} chunk merge(s) did not succeed",
                stage.failed + stage.timed_out,
                stage.total
            );
        }

        let reduction = reduce(
            self.engine.as_ref(),
            &layout,
            chunk_count,
            &stage,
            self.config.reduce.policy,
        );
        let success = stage.success() && reduction.success();

        Ok(RunReport {
            work_dir: work_dir.to_owned(),
            input_files: files.len(),
            chunks: chunk_count,
            skipped,
            stage,
            reduction,
            success,
        })
    }
}
