use std::path::PathBuf;

use kselect::error::SelectorError;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt binary cache: {0}")]
    Corrupt(String),
    #[error("kernel build failed: {message}")]
    Build { message: String },
    #[error("binary cache hash {hash:#x} is already taken by a different kernel")]
    Collision { hash: usize },
    #[error(transparent)]
    Selection(#[from] SelectorError),
}

impl CacheError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        CacheError::Build {
            message: message.into(),
        }
    }
}
