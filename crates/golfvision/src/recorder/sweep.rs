//! Periodic deletion of resolved error reports past retention.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::errors::ErrorRecorder;

pub struct RetentionSweeper {
    recorder: Arc<ErrorRecorder>,
    interval: Duration,
    retention: chrono::Duration,
    shutdown: CancellationToken,
}

impl RetentionSweeper {
    pub fn new(recorder: Arc<ErrorRecorder>, interval: Duration, retention_days: u32) -> Self {
        Self {
            recorder,
            interval,
            retention: chrono::Duration::days(i64::from(retention_days)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Starts the sweep loop on `handle`. The first sweep runs one interval
    /// after start. A zero interval disables sweeping; the task then only
    /// waits for [`stop`](Self::stop).
    pub fn start(&self, handle: &Handle) -> JoinHandle<()> {
        let recorder = Arc::clone(&self.recorder);
        let shutdown = self.shutdown.clone();
        let interval = self.interval;
        let retention = self.retention;

        if interval.is_zero() {
            log::warn!("Retention sweep interval is zero, sweeping disabled");
            return handle.spawn(async move { shutdown.cancelled().await });
        }

        handle.spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await; // skip immediate first tick

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let removed = recorder.sweep_resolved(retention);
                log::debug!("Retention sweep removed {} reports", removed);
            }

            log::info!("Retention sweep stopped");
        })
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}
