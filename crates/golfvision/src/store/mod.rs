//! Job persistence behind a small synchronous interface.
//!
//! Every operation is expected to complete in well under a millisecond, so
//! callers may hold a short lock across a read-modify-write sequence.

mod memory;
mod sqlite;

pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;

use crate::error::StoreError;
use crate::job::{Job, JobId};

pub trait JobStore: Send + Sync {
    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Inserts or replaces the job with the same ID.
    fn put(&self, job: &Job) -> Result<(), StoreError>;

    /// Returns whether a job was removed.
    fn delete(&self, id: &JobId) -> Result<bool, StoreError>;

    /// All jobs, newest first.
    fn list(&self) -> Result<Vec<Job>, StoreError>;
}
