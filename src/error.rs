//! Run-level error types.
//!
//! [`MergeError`] covers everything that stops a run *before* any merge work
//! is scheduled: a missing input path, an invalid configuration, an archive
//! that cannot be expanded, or a directory that cannot be listed. Failures of
//! individual merge tasks are never represented here; they are logged and
//! folded into the run's aggregate success flag.

use std::fmt;
use std::path::PathBuf;

use crate::config::ConfigError;
use crate::extract::ExtractError;

// ---------------------------------------------------------------------------
// MergeError
// ---------------------------------------------------------------------------

/// Fail-fast error for a merge run.
///
/// Each variant's message names the offending path and how to fix it.
#[derive(Debug)]
pub enum MergeError {
    /// The input path given on the command line does not exist.
    InputNotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// Directory mode was requested but the path is not a directory.
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// Archive mode was requested but the path is not a regular file.
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },

    /// The configuration is invalid.
    Config(ConfigError),

    /// The input archive could not be extracted.
    Extract(ExtractError),

    /// The working directory could not be listed.
    Discovery {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl fmt::Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputNotFound { path } => {
                write!(
                    f,
                    "the file {} does not exist.\n  To fix: pass an existing zip archive with --zipfile or a directory with --directory",
                    path.display()
                )
            }
            Self::NotADirectory { path } => {
                write!(
                    f,
                    "{} is not a directory.\n  To fix: use --zipfile for archives, --directory for folders of XML files",
                    path.display()
                )
            }
            Self::NotAFile { path } => {
                write!(
                    f,
                    "{} is not a file.\n  To fix: use --directory for folders of XML files, --zipfile for archives",
                    path.display()
                )
            }
            Self::Config(e) => write!(f, "{e}"),
            Self::Extract(e) => write!(f, "{e}"),
            Self::Discovery { path, source } => {
                write!(
                    f,
                    "could not list input files in {}: {source}\n  To fix: check that the directory is readable",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for MergeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Extract(e) => Some(e),
            Self::Discovery { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for MergeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ExtractError> for MergeError {
    fn from(e: ExtractError) -> Self {
        Self::Extract(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
