//! Fixed-size, order-preserving partition of input files.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// A group of input files merged together as one unit.
///
/// `index` is the 0-based position in the partition and names the chunk's
/// intermediate artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    index: usize,
    files: Vec<PathBuf>,
}

impl Chunk {
    /// Position of this chunk in the partition.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Member files, in input order.
    #[must_use]
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Number of member files. Never zero.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.files.len()
    }

    /// Always `false`; chunks are never empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn into_files(self) -> Vec<PathBuf> {
        self.files
    }
}

/// Split `files` into consecutive chunks of at most `chunk_size` files.
///
/// Produces `ceil(files.len() / chunk_size)` chunks with contiguous indices
/// starting at 0. Every chunk but the last holds exactly `chunk_size` files.
/// Paths are neither reordered nor deduplicated.
#[must_use]
pub fn split_into_chunks<P: AsRef<Path>>(files: &[P], chunk_size: NonZeroUsize) -> Vec<Chunk> {
    files
        .chunks(chunk_size.get())
        .enumerate()
        .map(|(index, group)| Chunk {
            index,
            files: group.iter().map(|p| p.as_ref().to_path_buf()).collect(),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
