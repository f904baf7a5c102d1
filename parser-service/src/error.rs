use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of a single document. Always carries the document path so the
/// caller can report it and move on to the next file.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed XML in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },

    #[error("{} is {size_mb} MB, over the {limit_mb} MB limit", path.display())]
    TooLarge {
        path: PathBuf,
        size_mb: u64,
        limit_mb: u64,
    },
}

impl DocumentError {
    pub fn path(&self) -> &Path {
        match self {
            DocumentError::Read { path, .. }
            | DocumentError::Malformed { path, .. }
            | DocumentError::TooLarge { path, .. } => path,
        }
    }
}

/// Input problems that stop a run
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input path does not exist: {}", .0.display())]
    Missing(PathBuf),

    #[error("no configuration documents found under {}", .0.display())]
    NoDocuments(PathBuf),

    #[error("none of the documents under {} could be parsed ({failed} failed)", path.display())]
    NothingParsed { path: PathBuf, failed: usize },

    #[error("cannot unpack archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },
}
