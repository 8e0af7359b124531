//! Serialised job mutations.
//!
//! Every change to a job's lifecycle goes through the ledger: read the job,
//! modify it, persist it, publish the resulting event. All of that happens
//! under one lock, so the published event order matches the order in which
//! the store saw the changes, and a cancellation can never interleave with a
//! half-applied stage transition.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use crate::broadcast::{JobEvent, StatusPublisher};
use crate::error::StoreError;
use crate::job::{Coordinates, FallbackRecord, Job, JobId, JobOutput, JobStatus};
use crate::store::JobStore;

/// Result of a mutation requested by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job is gone or already terminal; the caller should stop quietly.
    Stopped,
}

impl Transition {
    pub fn is_applied(self) -> bool {
        self == Transition::Applied
    }
}

pub struct JobLedger {
    store: Arc<dyn JobStore>,
    publisher: StatusPublisher,
    lock: Mutex<()>,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>, publisher: StatusPublisher) -> Self {
        Self {
            store,
            publisher,
            lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job ledger lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        self.store.get(id)
    }

    pub fn list(&self) -> Result<Vec<Job>, StoreError> {
        self.store.list()
    }

    /// Loads an active job, applies `f`, persists it. Returns `None` without
    /// touching anything when the job is missing or terminal.
    fn mutate_active<F>(&self, id: &JobId, f: F) -> Result<Option<Job>, StoreError>
    where
        F: FnOnce(&mut Job),
    {
        let Some(mut job) = self.store.get(id)? else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(None);
        }
        f(&mut job);
        job.touch();
        self.store.put(&job)?;
        Ok(Some(job))
    }

    fn cancel_locked(&self, job: &mut Job) -> Result<(), StoreError> {
        job.status = JobStatus::Cancelled;
        job.progress = JobStatus::Cancelled.progress_floor();
        job.touch();
        self.store.put(job)?;
        self.publisher
            .publish(&job.id, JobEvent::Update(job.snapshot()));
        log::info!("Job {} cancelled", job.id);
        Ok(())
    }

    fn cancel_active_locked(&self) -> Result<Vec<JobId>, StoreError> {
        let mut cancelled = Vec::new();
        for mut job in self.store.list()? {
            if job.is_active() {
                self.cancel_locked(&mut job)?;
                cancelled.push(job.id);
            }
        }
        Ok(cancelled)
    }

    /// Cancels every active job, then stores `job`. Both happen before any
    /// other mutation can observe the intermediate state.
    pub fn preempt_and_insert(&self, job: &Job) -> Result<Vec<JobId>, StoreError> {
        let _guard = self.guard();
        let cancelled = self.cancel_active_locked()?;
        self.store.put(job)?;
        Ok(cancelled)
    }

    pub fn cancel_all_active(&self) -> Result<Vec<JobId>, StoreError> {
        let _guard = self.guard();
        self.cancel_active_locked()
    }

    /// `None` when the job is unknown, `Some(false)` when it was already
    /// terminal.
    pub fn cancel(&self, id: &JobId) -> Result<Option<bool>, StoreError> {
        let _guard = self.guard();
        let Some(mut job) = self.store.get(id)? else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(Some(false));
        }
        self.cancel_locked(&mut job)?;
        Ok(Some(true))
    }

    /// Moves an active job into `status` and raises progress to its floor.
    pub fn advance(&self, id: &JobId, status: JobStatus) -> Result<Transition, StoreError> {
        let _guard = self.guard();
        let Some(current) = self.store.get(id)? else {
            return Ok(Transition::Stopped);
        };
        if !current.status.can_advance_to(status) || status.is_terminal() {
            if current.status.is_active() {
                log::warn!(
                    "Refusing transition {} -> {} for job {}",
                    current.status,
                    status,
                    id
                );
            }
            return Ok(Transition::Stopped);
        }

        let job = self.mutate_active(id, |job| {
            job.status = status;
            job.progress = job.progress.max(status.progress_floor());
        })?;
        match job {
            Some(job) => {
                self.publisher.publish(id, JobEvent::Update(job.snapshot()));
                Ok(Transition::Applied)
            }
            None => Ok(Transition::Stopped),
        }
    }

    /// Stores geocoded coordinates. Not a status change, so nothing is
    /// published.
    pub fn set_coordinates(&self, id: &JobId, at: Coordinates) -> Result<Transition, StoreError> {
        let _guard = self.guard();
        let job = self.mutate_active(id, |job| job.coordinates = Some(at))?;
        Ok(if job.is_some() {
            Transition::Applied
        } else {
            Transition::Stopped
        })
    }

    /// Appends a fallback entry. It becomes visible with the next published
    /// snapshot.
    pub fn add_fallback(&self, id: &JobId, record: FallbackRecord) -> Result<Transition, StoreError> {
        let _guard = self.guard();
        let job = self.mutate_active(id, |job| job.fallbacks.push(record))?;
        Ok(if job.is_some() {
            Transition::Applied
        } else {
            Transition::Stopped
        })
    }

    pub fn complete(&self, id: &JobId, output: JobOutput) -> Result<Transition, StoreError> {
        let _guard = self.guard();
        let job = self.mutate_active(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = JobStatus::Completed.progress_floor();
            job.completed_at = Some(Utc::now());
            job.output = Some(output);
        })?;
        match job {
            Some(job) => {
                log::info!("Job {} completed", id);
                self.publisher.publish(id, JobEvent::Complete(Box::new(job)));
                Ok(Transition::Applied)
            }
            None => Ok(Transition::Stopped),
        }
    }

    /// Fails an active job. A job that was cancelled meanwhile stays
    /// cancelled.
    pub fn fail(&self, id: &JobId, message: &str) -> Result<Transition, StoreError> {
        let _guard = self.guard();
        let job = self.mutate_active(id, |job| {
            job.status = JobStatus::Failed;
            job.progress = JobStatus::Failed.progress_floor();
            job.output = None;
            job.errors.push(message.to_string());
        })?;
        match job {
            Some(job) => {
                log::error!("Job {} failed: {}", id, message);
                self.publisher.publish(
                    id,
                    JobEvent::Error {
                        message: message.to_string(),
                        snapshot: job.snapshot(),
                    },
                );
                Ok(Transition::Applied)
            }
            None => Ok(Transition::Stopped),
        }
    }

    /// Removes the job and closes its event channel.
    pub fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        let _guard = self.guard();
        let deleted = self.store.delete(id)?;
        if deleted {
            self.publisher.close(id);
        }
        Ok(deleted)
    }

    /// Fails jobs left active by a previous process. Called once at startup.
    pub fn recover_interrupted(&self) -> Result<usize, StoreError> {
        let interrupted: Vec<JobId> = self
            .store
            .list()?
            .into_iter()
            .filter(|job| job.is_active())
            .map(|job| job.id)
            .collect();
        for id in &interrupted {
            self.fail(id, "Interrupted by service restart")?;
        }
        if !interrupted.is_empty() {
            log::warn!("Marked {} interrupted jobs as failed", interrupted.len());
        }
        Ok(interrupted.len())
    }
}
