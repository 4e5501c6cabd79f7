//! Input file discovery.
//!
//! Lists the regular files directly inside a working directory whose names
//! match the configured glob. Paths are sorted so chunk membership (and with
//! it, artifact names) is reproducible across runs and platforms. Files this
//! tool writes itself are never returned.

use std::fs;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tracing::debug;

use crate::artifact::is_generated_artifact;
use crate::config::ConfigError;
use crate::error::MergeError;

/// Discover input files in `dir` whose file names match `pattern`.
///
/// Subdirectories are not descended into.
///
/// # Errors
/// Returns [`MergeError::Config`] for an invalid pattern and
/// [`MergeError::Discovery`] if the directory cannot be read.
pub fn discover_inputs(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, MergeError> {
    let matcher = Pattern::new(pattern).map_err(|e| ConfigError {
        path: None,
        message: format!("discovery.pattern '{pattern}' is not a valid glob: {e}"),
    })?;

    let discovery_err = |source| MergeError::Discovery {
        path: dir.to_owned(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(discovery_err)? {
        let entry = entry.map_err(discovery_err)?;
        if !entry.file_type().map_err(discovery_err)?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
            continue;
        };
        if is_generated_artifact(name) {
            debug!(file = name, "skipping generated artifact");
            continue;
        }
        if matcher.matches(name) {
            files.push(entry.path());
        }
    }

    files.sort();
    debug!(dir = %dir.display(), count = files.len(), "discovered input files");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "<bom/>").unwrap();
    }

    #[test]
    fn finds_xml_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.xml", "a.xml", "b.xml", "readme.txt"] {
            touch(dir.path(), name);
        }
        let files = discover_inputs(dir.path(), "*.xml").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.xml", "b.xml", "c.xml"]);
    }

    #[test]
    fn skips_generated_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "a.xml",
            "intermediate_0.xml",
            "intermediate_run1_4.xml",
            "final_merged.xml",
        ] {
            touch(dir.path(), name);
        }
        let files = discover_inputs(dir.path(), "*.xml").unwrap();
        assert_eq!(files, vec![dir.path().join("a.xml")]);
    }

    #[test]
    fn does_not_descend_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "top.xml");
        fs::create_dir(dir.path().join("nested.xml")).unwrap();
        touch(&dir.path().join("nested.xml"), "inner.xml");
        let files = discover_inputs(dir.path(), "*.xml").unwrap();
        assert_eq!(files, vec![dir.path().join("top.xml")]);
    }

    #[test]
    fn custom_pattern() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.cdx.xml");
        touch(dir.path(), "b.xml");
        let files = discover_inputs(dir.path(), "*.cdx.xml").unwrap();
        assert_eq!(files, vec![dir.path().join("a.cdx.xml")]);
    }

    #[test]
    fn empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_inputs(dir.path(), "*.xml").unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_inputs(&dir.path().join("gone"), "*.xml").unwrap_err();
        assert!(matches!(err, MergeError::Discovery { .. }));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_inputs(dir.path(), "[").unwrap_err();
        assert!(matches!(err, MergeError::Config(_)));
    }
}
