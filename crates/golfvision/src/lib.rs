pub mod broadcast;
pub mod config;
pub mod db;
pub mod engines;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod recorder;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod supervisor;

pub use broadcast::{JobEvent, StatusPublisher, Subscription};
pub use config::{load_config, load_config_from_str, Config};
pub use engines::{EngineError, Engines};
pub use error::{
    ConfigError, GolfVisionError, RecorderError, Result, SchedulerError, StoreError,
    ValidationError,
};
pub use job::{
    Coordinates, FallbackRecord, Job, JobId, JobOutput, JobSnapshot, JobStatus, SubmitRequest,
};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineSettings};
pub use recorder::{ErrorRecorder, ErrorReport, PerformanceRecorder, ReportKind, Severity};
pub use scheduler::{JobCounts, JobLedger, JobRunner, Scheduler};
pub use service::GolfVision;
pub use supervisor::{Invocation, Supervisor, SupervisorError};
