//! Single-active-job scheduling.
//!
//! `submit` pre-empts whatever is running, queues the new job and makes sure
//! a worker loop is draining the queue. The loop runs one job at a time and
//! exits when the queue is empty; the next submission starts a new one.

pub mod ledger;

pub use ledger::{JobLedger, Transition};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::error::{GolfVisionError, SchedulerError};
use crate::job::{Job, JobId, JobStatus, SubmitRequest};
use crate::pipeline::PipelineOutcome;
use crate::recorder::{ErrorRecorder, ErrorReport, ReportKind, Severity};
use crate::supervisor::Supervisor;

/// Executes one job to a terminal status.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run_job(&self, job: Job, cancel: CancellationToken) -> PipelineOutcome;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCounts {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<JobId>,
    draining: bool,
    closed: bool,
    /// In-process cancellation for queued and running jobs.
    tokens: HashMap<JobId, CancellationToken>,
}

struct Inner {
    ledger: Arc<JobLedger>,
    runner: Arc<dyn JobRunner>,
    supervisor: Supervisor,
    errors: Arc<ErrorRecorder>,
    handle: Handle,
    state: Mutex<QueueState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Scheduler queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Stops in-process work and native processes of cancelled jobs.
    fn interrupt(&self, state: &mut QueueState, ids: &[JobId]) {
        for id in ids {
            if let Some(token) = state.tokens.remove(id) {
                token.cancel();
            }
            state.queue.retain(|queued| queued != id);
            let killed = self.supervisor.kill_all_for(id);
            if killed > 0 {
                log::info!("Killed {} processes of job {}", killed, id);
            }
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Must be called within a Tokio runtime; the worker loop is spawned on
    /// it.
    pub fn new(
        ledger: Arc<JobLedger>,
        runner: Arc<dyn JobRunner>,
        supervisor: Supervisor,
        errors: Arc<ErrorRecorder>,
    ) -> Result<Self, SchedulerError> {
        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self {
            inner: Arc::new(Inner {
                ledger,
                runner,
                supervisor,
                errors,
                handle,
                state: Mutex::new(QueueState::default()),
            }),
        })
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.inner.ledger
    }

    /// Validates and queues a job, cancelling every active job first.
    ///
    /// When this returns, pre-empted jobs are already `cancelled` and the
    /// new job is stored as `pending`.
    pub fn submit(&self, request: SubmitRequest) -> Result<Job, GolfVisionError> {
        let request = request.validate()?;
        let job = Job::new(request);

        let mut state = self.inner.state();
        if state.closed {
            return Err(SchedulerError::ShutDown.into());
        }

        let preempted = self
            .inner
            .ledger
            .preempt_and_insert(&job)
            .map_err(SchedulerError::from)?;
        if !preempted.is_empty() {
            log::info!(
                "Job {} pre-empted {} active job(s)",
                job.id,
                preempted.len()
            );
        }
        self.inner.interrupt(&mut state, &preempted);
        if !preempted.is_empty() {
            // Catches strays no cancelled job owns, e.g. from a crashed run.
            self.inner.supervisor.kill_all();
        }

        state.queue.push_back(job.id.clone());
        state.tokens.insert(job.id.clone(), CancellationToken::new());
        log::info!("Job {} queued for '{}'", job.id, job.subject_name);

        if !state.draining {
            state.draining = true;
            let inner = Arc::clone(&self.inner);
            self.inner.handle.spawn(drain(inner));
        }

        Ok(job)
    }

    /// `Ok(true)` if the job was active and is now cancelled, `Ok(false)` if
    /// it had already finished.
    pub fn cancel(&self, id: &JobId) -> Result<bool, SchedulerError> {
        let mut state = self.inner.state();
        match self.inner.ledger.cancel(id)? {
            None => Err(SchedulerError::NotFound(id.clone())),
            Some(false) => Ok(false),
            Some(true) => {
                self.inner.interrupt(&mut state, std::slice::from_ref(id));
                Ok(true)
            }
        }
    }

    /// Returns the IDs of the jobs that were cancelled.
    pub fn cancel_all_active(&self) -> Result<Vec<JobId>, SchedulerError> {
        let mut state = self.inner.state();
        let cancelled = self.inner.ledger.cancel_all_active()?;
        self.inner.interrupt(&mut state, &cancelled);
        Ok(cancelled)
    }

    pub fn get(&self, id: &JobId) -> Result<Option<Job>, SchedulerError> {
        Ok(self.inner.ledger.get(id)?)
    }

    /// Newest first.
    pub fn list(&self) -> Result<Vec<Job>, SchedulerError> {
        Ok(self.inner.ledger.list()?)
    }

    /// Removes a job, cancelling it first if it is still active.
    pub fn delete(&self, id: &JobId) -> Result<bool, SchedulerError> {
        match self.inner.ledger.get(id)? {
            None => return Ok(false),
            Some(job) if job.is_active() => {
                self.cancel(id)?;
            }
            Some(_) => {}
        }
        Ok(self.inner.ledger.delete(id)?)
    }

    pub fn counts(&self) -> Result<JobCounts, SchedulerError> {
        let jobs = self.inner.ledger.list()?;
        let mut counts = JobCounts {
            total: jobs.len(),
            ..JobCounts::default()
        };
        for job in &jobs {
            match job.status {
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
                _ => counts.active += 1,
            }
        }
        Ok(counts)
    }

    pub fn active_count(&self) -> Result<usize, SchedulerError> {
        Ok(self.counts()?.active)
    }

    pub fn queue_length(&self) -> usize {
        self.inner.state().queue.len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.state().draining
    }

    /// Resolves once the worker loop has exited.
    pub async fn wait_idle(&self) {
        while self.is_draining() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Rejects further submissions, cancels active jobs and kills every
    /// supervised process.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        self.inner.state().closed = true;
        let cancelled = self.cancel_all_active()?;
        let killed = self.inner.supervisor.kill_all();
        log::info!(
            "Scheduler shut down: {} job(s) cancelled, {} process(es) killed",
            cancelled.len(),
            killed
        );
        Ok(())
    }
}

/// The worker loop: one job at a time until the queue is empty.
async fn drain(inner: Arc<Inner>) {
    loop {
        let (id, token) = {
            let mut state = inner.state();
            match state.queue.pop_front() {
                Some(id) => {
                    let token = state.tokens.get(&id).cloned();
                    (id, token)
                }
                None => {
                    state.draining = false;
                    return;
                }
            }
        };

        // Cancelled while queued.
        let Some(token) = token else {
            continue;
        };

        let job = match inner.ledger.get(&id) {
            Ok(Some(job)) if job.status == JobStatus::Pending => job,
            Ok(_) => {
                inner.state().tokens.remove(&id);
                continue;
            }
            Err(e) => {
                log::error!("Failed to load job {}: {}", id, e);
                inner.state().tokens.remove(&id);
                continue;
            }
        };

        let runner = Arc::clone(&inner.runner);
        let task = tokio::spawn(async move { runner.run_job(job, token).await });
        match task.await {
            Ok(outcome) => log::debug!("Job {} finished: {:?}", id, outcome),
            Err(e) => {
                let message = if e.is_panic() {
                    "Worker crashed while running the job".to_string()
                } else {
                    format!("Worker task aborted: {}", e)
                };
                log::error!("Job {}: {}", id, message);
                match inner.ledger.fail(&id, &message) {
                    Ok(Transition::Applied) => {
                        inner.errors.record(
                            ErrorReport::new(ReportKind::Error, Severity::Critical, message)
                                .for_job(&id),
                        );
                    }
                    Ok(Transition::Stopped) => {}
                    Err(e) => log::error!("Failed to mark job {} failed: {}", id, e),
                }
            }
        }

        inner.state().tokens.remove(&id);
    }
}
