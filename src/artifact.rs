//! Naming of intermediate and final merge artifacts.
//!
//! Intermediate artifacts are named purely from the chunk index
//! (`intermediate_<index>.xml`), optionally scoped by a run id
//! (`intermediate_<run_id>_<index>.xml`). The same index always maps to the
//! same path, which is what lets an interrupted run resume.

use std::path::{Path, PathBuf};

/// File name of the reduction output.
pub const FINAL_OUTPUT_NAME: &str = "final_merged.xml";

const INTERMEDIATE_PREFIX: &str = "intermediate_";
const ARTIFACT_EXTENSION: &str = ".xml";

/// Where a run writes its artifacts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactLayout {
    dir: PathBuf,
    run_id: Option<String>,
}

impl ArtifactLayout {
    /// Layout rooted at `dir`, optionally scoped by `run_id`.
    ///
    /// `run_id` is expected to be validated already (no path separators).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, run_id: Option<String>) -> Self {
        Self {
            dir: dir.into(),
            run_id,
        }
    }

    /// The directory artifacts are written into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name of the intermediate artifact for chunk `index`.
    #[must_use]
    pub fn intermediate_name(&self, index: usize) -> String {
        match &self.run_id {
            Some(run) => format!("{INTERMEDIATE_PREFIX}{run}_{index}{ARTIFACT_EXTENSION}"),
            None => format!("{INTERMEDIATE_PREFIX}{index}{ARTIFACT_EXTENSION}"),
        }
    }

    /// Full path of the intermediate artifact for chunk `index`.
    #[must_use]
    pub fn intermediate_path(&self, index: usize) -> PathBuf {
        self.dir.join(self.intermediate_name(index))
    }

    /// Intermediate paths for chunks `0..count`, in index order.
    #[must_use]
    pub fn intermediate_paths(&self, count: usize) -> Vec<PathBuf> {
        (0..count).map(|i| self.intermediate_path(i)).collect()
    }

    /// Full path of the reduction output.
    #[must_use]
    pub fn final_output(&self) -> PathBuf {
        self.dir.join(FINAL_OUTPUT_NAME)
    }
}

/// Whether `file_name` looks like something a merge run writes.
///
/// Discovery uses this to keep earlier outputs from being fed back in as
/// inputs on a re-run. Any run id is matched.
#[must_use]
pub fn is_generated_artifact(file_name: &str) -> bool {
    file_name == FINAL_OUTPUT_NAME
        || (file_name.starts_with(INTERMEDIATE_PREFIX) && file_name.ends_with(ARTIFACT_EXTENSION))
}
