//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database. Structured fields are JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub subject_name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub seed: Option<i64>,
    pub status: String,
    pub progress: i64,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub output: Option<String>,
    pub errors: String,
    pub fallbacks: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            subject_name: row.get("subject_name")?,
            lat: row.get("lat")?,
            lng: row.get("lng")?,
            seed: row.get("seed")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            output: row.get("output")?,
            errors: row.get("errors")?,
            fallbacks: row.get("fallbacks")?,
        })
    }
}

/// Inserts the row, or overwrites every mutable column if the ID exists.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, subject_name, lat, lng, seed, status, progress,
             created_at, updated_at, completed_at, output, errors, fallbacks)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                subject_name=excluded.subject_name, lat=excluded.lat, lng=excluded.lng,
                seed=excluded.seed, status=excluded.status, progress=excluded.progress,
                updated_at=excluded.updated_at, completed_at=excluded.completed_at,
                output=excluded.output, errors=excluded.errors, fallbacks=excluded.fallbacks",
            params![
                job.id,
                job.subject_name,
                job.lat,
                job.lng,
                job.seed,
                job.status,
                job.progress,
                job.created_at,
                job.updated_at,
                job.completed_at,
                job.output,
                job.errors,
                job.fallbacks,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns every job, newest first.
pub fn list(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Deletes a job. Returns whether a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    })
}
