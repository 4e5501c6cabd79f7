//! Zip archive input.
//!
//! An archive `path/to/sboms.zip` is expanded into the sibling directory
//! `path/to/sboms`, which then becomes the run's working directory. The
//! archive is fully decompressed into a hidden staging directory next to the
//! target first and only moved into place once every entry was read, so a
//! corrupt archive leaves nothing behind. Expanding into an existing
//! directory overwrites files of the same name and keeps everything else,
//! including intermediate artifacts from an interrupted run.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zip::ZipArchive;
use zip::result::ZipError;

/// Error expanding an input archive.
#[derive(Debug)]
pub enum ExtractError {
    /// The archive file could not be opened.
    Open {
        /// Archive path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The file is not a readable zip archive, or an entry is corrupt.
    InvalidArchive {
        /// Archive path.
        path: PathBuf,
        /// Decoder message.
        detail: String,
    },
    /// Staging or moving extracted files failed.
    Io {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The archive has no extension, so the target would be the archive itself.
    NoExtension {
        /// Archive path.
        path: PathBuf,
    },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open { path, source } => {
                write!(f, "could not open zip file {}: {source}", path.display())
            }
            Self::InvalidArchive { path, detail } => {
                write!(
                    f,
                    "Invalid zip file: {} ({detail})\n  To fix: re-download or re-create the archive; nothing was extracted",
                    path.display()
                )
            }
            Self::Io { path, source } => {
                write!(f, "error extracting into {}: {source}", path.display())
            }
            Self::NoExtension { path } => {
                write!(
                    f,
                    "cannot derive an extraction directory from {}: the file has no extension\n  To fix: rename the archive to end in .zip",
                    path.display()
                )
            }
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// The directory an archive expands into: the archive path minus its extension.
///
/// # Errors
/// Returns [`ExtractError::NoExtension`] if the path has no extension.
pub fn extraction_dir(archive: &Path) -> Result<PathBuf, ExtractError> {
    if archive.extension().is_none() {
        return Err(ExtractError::NoExtension {
            path: archive.to_owned(),
        });
    }
    Ok(archive.with_extension(""))
}

/// Expand `archive` into its sibling extraction directory and return it.
///
/// # Errors
/// Returns [`ExtractError`] if the archive cannot be opened or decoded, or the
/// extracted files cannot be moved into place.
#[tracing::instrument(skip(archive), fields(archive = %archive.display()))]
pub fn extract_archive(archive: &Path) -> Result<PathBuf, ExtractError> {
    let target = extraction_dir(archive)?;
    extract_into(archive, &target)?;
    info!("Unzipped {} to {}", archive.display(), target.display());
    Ok(target)
}

/// Expand `archive` into `target`, creating it if needed.
///
/// # Errors
/// See [`extract_archive`].
pub fn extract_into(archive: &Path, target: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive).map_err(|source| ExtractError::Open {
        path: archive.to_owned(),
        source,
    })?;
    let mut zip = ZipArchive::new(file).map_err(|e| zip_error(archive, e))?;
    debug!(entries = zip.len(), "opened archive");

    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let staging = tempfile::Builder::new()
        .prefix(".sbom-extract-")
        .tempdir_in(&parent)
        .map_err(|source| ExtractError::Io {
            path: parent.clone(),
            source,
        })?;

    zip.extract(staging.path())
        .map_err(|e| zip_error(archive, e))?;

    move_tree(staging.path(), target)
}

fn zip_error(archive: &Path, e: ZipError) -> ExtractError {
    match e {
        ZipError::Io(source) if source.kind() != io::ErrorKind::InvalidData => ExtractError::Io {
            path: archive.to_owned(),
            source,
        },
        other => ExtractError::InvalidArchive {
            path: archive.to_owned(),
            detail: other.to_string(),
        },
    }
}

/// Move every entry under `src` into `dst`, merging directories.
fn move_tree(src: &Path, dst: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(dst).map_err(io_err(dst))?;
    for entry in fs::read_dir(src).map_err(io_err(src))? {
        let entry = entry.map_err(io_err(src))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type().map_err(io_err(&from))?.is_dir() {
            move_tree(&from, &to)?;
        } else {
            fs::rename(&from, &to).map_err(io_err(&to))?;
        }
    }
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExtractError + use<> {
    let path = path.to_owned();
    move |source| ExtractError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extraction_dir_strips_extension() {
        assert_eq!(
            extraction_dir(Path::new("/data/sboms.zip")).unwrap(),
            PathBuf::from("/data/sboms")
        );
        assert_eq!(
            extraction_dir(Path::new("release.v2.zip")).unwrap(),
            PathBuf::from("release.v2")
        );
        assert!(extraction_dir(Path::new("/data/sboms")).is_err());
    }

    #[test]
    fn extracts_into_sibling_directory() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("a.xml", "<bom a/>"), ("b.xml", "<bom b/>")]);

        let target = extract_archive(&archive).unwrap();

        assert_eq!(target, dir.path().join("bundle"));
        assert_eq!(fs::read_to_string(target.join("a.xml")).unwrap(), "<bom a/>");
        assert!(target.join("b.xml").exists());
    }

    #[test]
    fn leaves_no_staging_directory_behind() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("a.xml", "<bom/>")]);

        extract_archive(&archive).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".sbom-extract-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn re_extraction_keeps_existing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("a.xml", "<bom new/>")]);
        let target = dir.path().join("bundle");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("a.xml"), "<bom old/>").unwrap();
        fs::write(target.join("intermediate_0.xml"), "<bom merged/>").unwrap();

        extract_archive(&archive).unwrap();

        assert_eq!(fs::read_to_string(target.join("a.xml")).unwrap(), "<bom new/>");
        assert!(target.join("intermediate_0.xml").exists());
    }

    #[test]
    fn nested_entries_are_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("nested/deep.xml", "<bom/>")]);

        let target = extract_archive(&archive).unwrap();

        assert!(target.join("nested").join("deep.xml").exists());
    }

    #[test]
    fn corrupt_archive_is_rejected_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        fs::write(&archive, b"this is not a zip archive").unwrap();

        let err = extract_archive(&archive).unwrap_err();

        assert!(matches!(err, ExtractError::InvalidArchive { .. }), "got {err:?}");
        assert!(format!("{err}").contains("Invalid zip file"));
        assert!(!dir.path().join("broken").exists());
    }

    #[test]
    fn missing_archive_is_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive(&dir.path().join("absent.zip")).unwrap_err();
        assert!(matches!(err, ExtractError::Open { .. }));
    }
}
