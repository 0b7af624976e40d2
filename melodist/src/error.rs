use std::path::PathBuf;

use melodist_core::error::{CorpusFormatError, VocabularyError};
use thiserror::Error;

/// Everything that can go wrong between a corpus and a generated melody.
#[derive(Error, Debug)]
pub enum MelodyError {
    #[error(transparent)]
    Corpus(#[from] CorpusFormatError),

    #[error(transparent)]
    Vocabulary(#[from] VocabularyError),

    /// Tensor dimensions that cannot be combined. Fatal to the current batch
    /// or generation call.
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("tensor operation failed: {0:?}")]
    Tensor(dfdx::tensor::Error),

    /// A model artifact that is missing, unreadable or malformed.
    #[error("{}: {reason}", path.display())]
    Resource { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("note-event export failed: {0}")]
    Midi(String),
}

impl From<dfdx::tensor::Error> for MelodyError {
    fn from(e: dfdx::tensor::Error) -> Self {
        Self::Tensor(e)
    }
}

impl MelodyError {
    pub(crate) fn resource(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Resource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = MelodyError> = std::result::Result<T, E>;
