//! Error taxonomy shared by every stage of the pipeline.
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatnError>;

#[derive(Debug, Error)]
pub enum GatnError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {msg}")]
    Parse {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("dataset {0} has no samples")]
    EmptyDataset(String),

    #[error("no dataset files found in {0}")]
    MissingDataset(PathBuf),

    #[error("target class {target} is out of range for {num_classes} classes")]
    InvalidTargetClass { target: usize, num_classes: usize },

    #[error("sample id {sample_id} is out of range for a partition of {len} samples")]
    InvalidSampleId { sample_id: usize, len: usize },

    #[error("class {0} does not occur in the selected partition")]
    InvalidClass(usize),

    #[error("checkpoint not found: {0}")]
    MissingCheckpoint(PathBuf),

    #[error("generator was trained against classifier {expected}, not {found}")]
    ClassifierMismatch { expected: String, found: String },

    #[error("no adversary log at {0}; run the search or evaluation first")]
    MissingAdversaryLog(PathBuf),

    #[error("serialization error on {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("plotting failed: {0}")]
    Plot(String),
}

impl GatnError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            msg: msg.into(),
        }
    }
}
