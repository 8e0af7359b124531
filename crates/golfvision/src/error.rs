use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum GolfVisionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Recorder error: {0}")]
    Recorder(#[from] RecorderError),

    #[error("Engine setup failed: {0}")]
    Engine(#[from] crate::engines::EngineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid engine '{name}': {reason}")]
    InvalidEngine { name: String, reason: String },
}

/// Rejections raised before a job record exists.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("subjectName is required")]
    EmptySubject,

    #[error("subjectName must be at most {max} characters (got {len})")]
    SubjectTooLong { len: usize, max: usize },

    #[error("coordinates out of range: lat {lat}, lng {lng}")]
    CoordinatesOutOfRange { lat: f64, lng: f64 },

    #[error("seed must be between 0 and {max} (got {seed})")]
    SeedOutOfRange { seed: u64, max: u64 },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to encode job {job_id}: {source}")]
    Encode {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stored job '{job_id}' is corrupt: {reason}")]
    Corrupt { job_id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("No Tokio runtime available to drive the worker loop")]
    NoRuntime,

    #[error("Scheduler has been shut down")]
    ShutDown,
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to read error log '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write error log '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse error log: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GolfVisionError>;
