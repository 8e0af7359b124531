use std::path::PathBuf;

use thiserror::Error;

use crate::engines::EngineError;
use crate::error::StoreError;
use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum StageError {
    /// Not a failure: the job was cancelled or removed while running.
    #[error("Job was cancelled")]
    Cancelled,

    #[error("{stage} failed: {source}")]
    Engine {
        stage: JobStatus,
        #[source]
        source: EngineError,
    },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to prepare workspace '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    pub fn stage(&self) -> Option<JobStatus> {
        match self {
            StageError::Engine { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    Failed,
    Cancelled,
}
