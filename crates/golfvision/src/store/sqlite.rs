//! SQLite-backed job store.

use chrono::{DateTime, SecondsFormat, Utc};

use super::JobStore;
use crate::db::job_repo::{self, JobRow};
use crate::db::Database;
use crate::error::StoreError;
use crate::job::{Coordinates, Job, JobId, JobStatus};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn format_timestamp(dt: DateTime<Utc>) -> String {
    // Fixed width so lexical ORDER BY matches chronological order.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str, job_id: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!(
                "Failed to parse timestamp '{}' for job {}: {}",
                s,
                job_id,
                e
            );
            Utc::now()
        })
}

fn encode<T: serde::Serialize>(job_id: &JobId, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Encode {
        job_id: job_id.to_string(),
        source: e,
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    job_id: &str,
    column: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        job_id: job_id.to_string(),
        reason: format!("column {}: {}", column, e),
    })
}

fn to_row(job: &Job) -> Result<JobRow, StoreError> {
    let output = match &job.output {
        Some(output) => Some(encode(&job.id, output)?),
        None => None,
    };

    Ok(JobRow {
        id: job.id.to_string(),
        subject_name: job.subject_name.clone(),
        lat: job.coordinates.map(|c| c.lat),
        lng: job.coordinates.map(|c| c.lng),
        seed: job.seed.map(|s| s as i64),
        status: job.status.as_str().to_string(),
        progress: i64::from(job.progress),
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        completed_at: job.completed_at.map(format_timestamp),
        output,
        errors: encode(&job.id, &job.errors)?,
        fallbacks: encode(&job.id, &job.fallbacks)?,
    })
}

fn from_row(row: JobRow) -> Result<Job, StoreError> {
    let status: JobStatus = row.status.parse().map_err(|reason| StoreError::Corrupt {
        job_id: row.id.clone(),
        reason,
    })?;

    let coordinates = match (row.lat, row.lng) {
        (Some(lat), Some(lng)) => Some(Coordinates::new(lat, lng)),
        _ => None,
    };

    let output = match row.output.as_deref() {
        Some(raw) => Some(decode(&row.id, "output", raw)?),
        None => None,
    };

    Ok(Job {
        subject_name: row.subject_name,
        coordinates,
        seed: row.seed.and_then(|s| u64::try_from(s).ok()),
        status,
        progress: u8::try_from(row.progress.clamp(0, 100)).unwrap_or(0),
        created_at: parse_timestamp(&row.created_at, &row.id),
        updated_at: parse_timestamp(&row.updated_at, &row.id),
        completed_at: row
            .completed_at
            .as_deref()
            .map(|s| parse_timestamp(s, &row.id)),
        output,
        errors: decode(&row.id, "errors", &row.errors)?,
        fallbacks: decode(&row.id, "fallbacks", &row.fallbacks)?,
        id: JobId::from(row.id),
    })
}

// ─── SqliteJobStore ─────────────────────────────────────────────────────────

/// Durable job store. Jobs survive restarts until deleted.
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStore for SqliteJobStore {
    fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        job_repo::find_by_id(&self.db, id.as_str())?
            .map(from_row)
            .transpose()
    }

    fn put(&self, job: &Job) -> Result<(), StoreError> {
        job_repo::upsert(&self.db, &to_row(job)?)?;
        Ok(())
    }

    fn delete(&self, id: &JobId) -> Result<bool, StoreError> {
        Ok(job_repo::delete(&self.db, id.as_str())?)
    }

    fn list(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = Vec::new();
        for row in job_repo::list(&self.db)? {
            match from_row(row) {
                Ok(job) => jobs.push(job),
                Err(e) => log::error!("Skipping unreadable job row: {}", e),
            }
        }
        Ok(jobs)
    }
}
