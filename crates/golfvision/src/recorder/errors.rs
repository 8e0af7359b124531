//! Error/warning reports with resolution tracking.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RecorderError;
use crate::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution_notes: Option<String>,
}

impl ErrorReport {
    pub fn new(kind: ReportKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            severity,
            message: message.into(),
            context: Map::new(),
            job_id: None,
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_notes: None,
        }
    }

    pub fn for_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Filters for [`ErrorRecorder::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ErrorQuery {
    pub resolved: Option<bool>,
    pub severity: Option<Severity>,
    pub kind: Option<ReportKind>,
    pub job_id: Option<JobId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ErrorQuery {
    fn matches(&self, report: &ErrorReport) -> bool {
        self.resolved.map_or(true, |r| report.resolved == r)
            && self.severity.map_or(true, |s| report.severity == s)
            && self.kind.map_or(true, |k| report.kind == k)
            && self
                .job_id
                .as_ref()
                .map_or(true, |j| report.job_id.as_ref() == Some(j))
            && self.since.map_or(true, |t| report.timestamp >= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStats {
    pub total: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub by_type: BTreeMap<ReportKind, usize>,
}

/// In-memory error log, optionally mirrored to a JSON file.
///
/// Reports are kept in recording order. Persistence failures are logged and
/// never surface to callers of [`record`](Self::record).
pub struct ErrorRecorder {
    reports: RwLock<Vec<ErrorReport>>,
    persist_path: Option<PathBuf>,
}

impl Default for ErrorRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRecorder {
    pub fn new() -> Self {
        Self {
            reports: RwLock::new(Vec::new()),
            persist_path: None,
        }
    }

    /// Opens a recorder backed by `path`, loading earlier reports if the file
    /// exists.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Result<Self, RecorderError> {
        let path = path.into();
        let reports = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| RecorderError::Read {
                path: path.clone(),
                source: e,
            })?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Vec::new()
        };

        log::info!(
            "Error log opened at {} with {} reports",
            path.display(),
            reports.len()
        );

        Ok(Self {
            reports: RwLock::new(reports),
            persist_path: Some(path),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ErrorReport>> {
        match self.reports.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Error log lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ErrorReport>> {
        match self.reports.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Error log lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn persist(&self, reports: &[ErrorReport]) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if let Err(e) = write_reports(path, reports) {
            log::warn!("Failed to persist error log: {}", e);
        }
    }

    /// Stores a report and returns its ID. Critical reports raise an alert.
    pub fn record(&self, report: ErrorReport) -> String {
        if report.severity == Severity::Critical {
            log::error!(
                "CRITICAL ALERT: {} (job: {}, report: {})",
                report.message,
                report.job_id.as_ref().map(|j| j.as_str()).unwrap_or("-"),
                report.id
            );
        }

        let id = report.id.clone();
        let mut reports = self.write();
        reports.push(report);
        self.persist(&reports);
        id
    }

    /// Records a medium-severity warning, the level used for fallbacks.
    pub fn record_warning(
        &self,
        message: impl Into<String>,
        job_id: Option<&JobId>,
        context: Map<String, Value>,
    ) -> String {
        let mut report = ErrorReport::new(ReportKind::Warning, Severity::Medium, message);
        report.job_id = job_id.cloned();
        report.context = context;
        self.record(report)
    }

    /// Marks a report resolved. Returns `false` for unknown IDs.
    pub fn resolve(&self, id: &str, resolved_by: &str, notes: Option<&str>) -> bool {
        let mut reports = self.write();
        let Some(report) = reports.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        report.resolved = true;
        report.resolved_at = Some(Utc::now());
        report.resolved_by = Some(resolved_by.to_string());
        report.resolution_notes = notes.map(str::to_string);
        self.persist(&reports);
        true
    }

    pub fn get(&self, id: &str) -> Option<ErrorReport> {
        self.read().iter().find(|r| r.id == id).cloned()
    }

    /// Matching reports, newest first.
    pub fn query(&self, query: &ErrorQuery) -> Vec<ErrorReport> {
        let reports = self.read();
        let matching = reports.iter().rev().filter(|r| query.matches(r)).cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    pub fn stats(&self) -> ErrorStats {
        let reports = self.read();
        let mut stats = ErrorStats {
            total: reports.len(),
            ..ErrorStats::default()
        };
        for report in reports.iter() {
            if report.resolved {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
            *stats.by_severity.entry(report.severity).or_insert(0) += 1;
            *stats.by_type.entry(report.kind).or_insert(0) += 1;
        }
        stats
    }

    /// Deletes resolved reports recorded before `cutoff`. Unresolved reports
    /// are kept regardless of age.
    pub fn sweep_resolved_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut reports = self.write();
        let before = reports.len();
        reports.retain(|r| !(r.resolved && r.timestamp < cutoff));
        let removed = before - reports.len();
        if removed > 0 {
            self.persist(&reports);
            log::info!("Swept {} resolved error reports", removed);
        }
        removed
    }

    pub fn sweep_resolved(&self, retention: Duration) -> usize {
        self.sweep_resolved_before(Utc::now() - retention)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

fn write_reports(path: &Path, reports: &[ErrorReport]) -> Result<(), RecorderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RecorderError::Write {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let json = serde_json::to_string_pretty(reports)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| RecorderError::Write {
        path: tmp.clone(),
        source: e,
    })?;
    std::fs::rename(&tmp, path).map_err(|e| RecorderError::Write {
        path: path.to_path_buf(),
        source: e,
    })
}
