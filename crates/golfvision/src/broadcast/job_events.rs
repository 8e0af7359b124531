//! Per-job status event fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{Job, JobId, JobSnapshot};

/// A status notification for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Status, progress or fallback list changed.
    Update(JobSnapshot),
    /// The job reached `completed`.
    Complete(Box<Job>),
    /// The job reached `failed`.
    Error {
        message: String,
        snapshot: JobSnapshot,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Update(snapshot) => &snapshot.id,
            JobEvent::Complete(job) => &job.id,
            JobEvent::Error { snapshot, .. } => &snapshot.id,
        }
    }

    pub fn progress(&self) -> u8 {
        match self {
            JobEvent::Update(snapshot) => snapshot.progress,
            JobEvent::Complete(job) => job.progress,
            JobEvent::Error { snapshot, .. } => snapshot.progress,
        }
    }
}

type Registry = Mutex<HashMap<JobId, Channel>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<JobId, Channel>> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Status publisher lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// Receiving end of a per-job subscription.
///
/// Dropping it releases the job's channel once no other subscriber is left.
pub struct Subscription {
    id: u64,
    job_id: JobId,
    generation: u64,
    receiver: broadcast::Receiver<JobEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Waits for the next event. Returns `None` once the publisher is gone.
    /// Events dropped because this subscriber lagged are skipped.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!(
                        "Subscriber {} for job {} lagged by {} events",
                        self.id,
                        self.job_id,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut channels = lock_registry(&registry);
        // A channel closed by a delete may have been replaced since.
        let last = match channels.get_mut(&self.job_id) {
            Some(channel) if channel.generation == self.generation => {
                channel.subscribers = channel.subscribers.saturating_sub(1);
                channel.subscribers == 0
            }
            _ => false,
        };
        if last {
            channels.remove(&self.job_id);
        }
    }
}

struct Channel {
    sender: broadcast::Sender<JobEvent>,
    subscribers: usize,
    generation: u64,
}

/// Registry of per-job broadcast channels plus a feed of every event.
///
/// Publishing never blocks; a job with no subscribers is a no-op.
#[derive(Clone)]
pub struct StatusPublisher {
    channels: Arc<Registry>,
    all: Arc<broadcast::Sender<JobEvent>>,
    capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl StatusPublisher {
    /// Creates a publisher whose channels buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (all, _) = broadcast::channel(capacity);
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            all: Arc::new(all),
            capacity,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<JobId, Channel>> {
        lock_registry(&self.channels)
    }

    /// Delivers `event` to current subscribers of `job_id`.
    pub fn publish(&self, job_id: &JobId, event: JobEvent) {
        if let Some(channel) = self.channels().get(job_id) {
            // Ignore errors - no active receivers is fine
            let _ = channel.sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Subscribes to future events for one job. Past events are not replayed.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let mut channels = self.channels();
        let channel = channels.entry(job_id.clone()).or_insert_with(|| Channel {
            sender: broadcast::channel(self.capacity).0,
            subscribers: 0,
            generation: self.next_id.fetch_add(1, Ordering::Relaxed),
        });
        channel.subscribers += 1;
        Subscription {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            job_id: job_id.clone(),
            generation: channel.generation,
            receiver: channel.sender.subscribe(),
            registry: Arc::downgrade(&self.channels),
        }
    }

    /// Ends a subscription. Same as dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Removes a job's channel. Its subscribers see the stream end.
    pub fn close(&self, job_id: &JobId) -> bool {
        self.channels().remove(job_id).is_some()
    }

    /// Receives every job's events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<JobEvent> {
        self.all.subscribe()
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.channels()
            .get(job_id)
            .map(|c| c.subscribers)
            .unwrap_or(0)
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(100)
    }
}
