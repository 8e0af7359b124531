pub mod model;
pub mod request;

pub use model::{
    Coordinates, FallbackRecord, Job, JobId, JobOutput, JobSnapshot, JobStatus, OutputMetadata,
};
pub use request::{SubmitRequest, MAX_SEED, MAX_SUBJECT_LEN};
