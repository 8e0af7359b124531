//! Append-only stage timings and the aggregates built from them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::resources::ResourceSnapshot;
use crate::job::{JobId, JobStatus};

const TOP_ERRORS: usize = 10;
const TREND_DAYS: i64 = 7;

/// One stage execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceLog {
    pub id: String,
    pub job_id: JobId,
    pub stage: JobStatus,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub resource_usage: ResourceSnapshot,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PerformanceLog {
    pub fn new(
        job_id: &JobId,
        stage: JobStatus,
        attempt: u32,
        duration: std::time::Duration,
        error: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.clone(),
            stage,
            attempt,
            timestamp: Utc::now(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            resource_usage: ResourceSnapshot::capture(),
            success: error.is_none(),
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrequency {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub entries: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub generated_at: DateTime<Utc>,
    pub window_hours: Option<i64>,
    pub total_entries: usize,
    /// Percentage of successful attempts; 0 when there are none.
    pub success_rate: f64,
    pub mean_stage_duration_ms: BTreeMap<String, f64>,
    pub mean_rss_bytes: Option<u64>,
    pub top_errors: Vec<ErrorFrequency>,
    /// Oldest day first, ending today. Ignores the window.
    pub trend: Vec<DailyTrend>,
}

#[derive(Default)]
pub struct PerformanceRecorder {
    logs: RwLock<Vec<PerformanceLog>>,
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<PerformanceLog>> {
        match self.logs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Performance log lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn log(&self, entry: PerformanceLog) {
        tracing::debug!(
            job_id = %entry.job_id,
            stage = %entry.stage,
            attempt = entry.attempt,
            duration_ms = entry.duration_ms,
            success = entry.success,
            "Stage attempt recorded"
        );
        let mut logs = match self.logs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Performance log lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        logs.push(entry);
    }

    pub fn entries(&self) -> Vec<PerformanceLog> {
        self.read().clone()
    }

    pub fn for_job(&self, job_id: &JobId) -> Vec<PerformanceLog> {
        self.read()
            .iter()
            .filter(|l| &l.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Aggregates over entries newer than `window`, or all entries.
    pub fn dashboard(&self, window: Option<Duration>) -> Dashboard {
        self.dashboard_at(Utc::now(), window)
    }

    fn dashboard_at(&self, now: DateTime<Utc>, window: Option<Duration>) -> Dashboard {
        let logs = self.read();
        let cutoff = window.map(|w| now - w);
        let selected: Vec<&PerformanceLog> = logs
            .iter()
            .filter(|l| cutoff.map_or(true, |c| l.timestamp >= c))
            .collect();

        let total_entries = selected.len();
        let successes = selected.iter().filter(|l| l.success).count();
        let success_rate = if total_entries == 0 {
            0.0
        } else {
            successes as f64 * 100.0 / total_entries as f64
        };

        let mut durations: BTreeMap<String, (u64, usize)> = BTreeMap::new();
        for entry in &selected {
            let slot = durations
                .entry(entry.stage.as_str().to_string())
                .or_insert((0, 0));
            slot.0 += entry.duration_ms;
            slot.1 += 1;
        }
        let mean_stage_duration_ms = durations
            .into_iter()
            .map(|(stage, (sum, n))| (stage, sum as f64 / n as f64))
            .collect();

        let rss: Vec<u64> = selected
            .iter()
            .filter_map(|l| l.resource_usage.rss_bytes)
            .collect();
        let mean_rss_bytes = if rss.is_empty() {
            None
        } else {
            Some(rss.iter().sum::<u64>() / rss.len() as u64)
        };

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for message in selected.iter().filter_map(|l| l.error.as_deref()) {
            *counts.entry(message).or_insert(0) += 1;
        }
        let mut top_errors: Vec<ErrorFrequency> = counts
            .into_iter()
            .map(|(message, count)| ErrorFrequency {
                message: message.to_string(),
                count,
            })
            .collect();
        top_errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
        top_errors.truncate(TOP_ERRORS);

        let today = now.date_naive();
        let trend = (0..TREND_DAYS)
            .rev()
            .map(|days_ago| {
                let date = today - Duration::days(days_ago);
                let day: Vec<&PerformanceLog> = logs
                    .iter()
                    .filter(|l| l.timestamp.date_naive() == date)
                    .collect();
                DailyTrend {
                    date,
                    entries: day.len(),
                    failures: day.iter().filter(|l| !l.success).count(),
                }
            })
            .collect();

        Dashboard {
            generated_at: now,
            window_hours: window.map(|w| w.num_hours()),
            total_entries,
            success_rate,
            mean_stage_duration_ms,
            mean_rss_bytes,
            top_errors,
            trend,
        }
    }
}
