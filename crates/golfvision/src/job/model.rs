//! Job record and the types it carries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::SubmitRequest;

/// Opaque, unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Geographic position, serialized as a `[lat, lng]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl From<[f64; 2]> for Coordinates {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lat, c.lng]
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.lat, self.lng)
    }
}

/// Pipeline state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Geocoding,
    FetchingData,
    BuildingModel,
    Rendering,
    PostProduction,
    Deliver,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Working stages in execution order.
    pub const STAGES: [JobStatus; 6] = [
        JobStatus::Geocoding,
        JobStatus::FetchingData,
        JobStatus::BuildingModel,
        JobStatus::Rendering,
        JobStatus::PostProduction,
        JobStatus::Deliver,
    ];

    /// Progress value a job carries while in this status.
    pub fn progress_floor(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Geocoding => 10,
            JobStatus::FetchingData => 25,
            JobStatus::BuildingModel => 40,
            JobStatus::Rendering => 70,
            JobStatus::PostProduction => 85,
            JobStatus::Deliver => 95,
            JobStatus::Completed => 100,
            JobStatus::Failed | JobStatus::Cancelled => 0,
        }
    }

    /// Completed, failed and cancelled are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Position in the left-to-right order; terminal failure states have none.
    fn rank(self) -> Option<u8> {
        match self {
            JobStatus::Pending => Some(0),
            JobStatus::Geocoding => Some(1),
            JobStatus::FetchingData => Some(2),
            JobStatus::BuildingModel => Some(3),
            JobStatus::Rendering => Some(4),
            JobStatus::PostProduction => Some(5),
            JobStatus::Deliver => Some(6),
            JobStatus::Completed => Some(7),
            JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` respects the state machine.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            // failed and cancelled are reachable from any active state
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Geocoding => "geocoding",
            JobStatus::FetchingData => "fetching_data",
            JobStatus::BuildingModel => "building_model",
            JobStatus::Rendering => "rendering",
            JobStatus::PostProduction => "post_production",
            JobStatus::Deliver => "deliver",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "geocoding" => Ok(JobStatus::Geocoding),
            "fetching_data" => Ok(JobStatus::FetchingData),
            "building_model" => Ok(JobStatus::BuildingModel),
            "rendering" => Ok(JobStatus::Rendering),
            "post_production" => Ok(JobStatus::PostProduction),
            "deliver" => Ok(JobStatus::Deliver),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Technical description of the delivered video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputMetadata {
    /// Seconds.
    pub duration: f64,
    /// `WIDTHxHEIGHT`.
    pub resolution: String,
    /// Bytes.
    pub file_size: u64,
    /// Wall-clock milliseconds from pipeline start to delivery.
    pub render_time: u64,
    pub fps: u32,
    pub codec: String,
}

/// Artifacts of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutput {
    pub video_url: String,
    pub captions_url: String,
    pub thumbnail_url: String,
    pub metadata: OutputMetadata,
}

/// A substitution made when an enrichment provider failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRecord {
    pub stage: JobStatus,
    pub reason: String,
    pub fallback_used: String,
    pub timestamp: DateTime<Utc>,
}

impl FallbackRecord {
    pub fn new(stage: JobStatus, reason: impl Into<String>, fallback_used: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            fallback_used: fallback_used.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A render job and everything known about its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub subject_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackRecord>,
}

impl Job {
    /// Creates a pending job from an already validated request.
    pub fn new(request: SubmitRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            subject_name: request.subject_name,
            coordinates: request.coordinates,
            seed: request.seed,
            status: JobStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            output: None,
            errors: Vec::new(),
            fallbacks: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            output: self.output.clone(),
            errors: self.errors.clone(),
            fallbacks: self.fallbacks.clone(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// The observable slice of a job that accompanies every status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JobOutput>,
    pub errors: Vec<String>,
    pub fallbacks: Vec<FallbackRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> SubmitRequest {
        SubmitRequest {
            subject_name: name.to_string(),
            coordinates: None,
            seed: None,
        }
    }

    #[test]
    fn test_progress_floors_are_monotonic_through_stages() {
        let mut last = JobStatus::Pending.progress_floor();
        for stage in JobStatus::STAGES {
            assert!(stage.progress_floor() > last, "{} regressed", stage);
            last = stage.progress_floor();
        }
        assert_eq!(JobStatus::Completed.progress_floor(), 100);
        assert_eq!(JobStatus::Failed.progress_floor(), 0);
        assert_eq!(JobStatus::Cancelled.progress_floor(), 0);
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_advance_to(JobStatus::Rendering));
            assert!(!terminal.can_advance_to(JobStatus::Cancelled));
        }
    }

    #[test]
    fn test_can_advance_only_forward() {
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Geocoding));
        assert!(JobStatus::Geocoding.can_advance_to(JobStatus::FetchingData));
        assert!(!JobStatus::Rendering.can_advance_to(JobStatus::BuildingModel));
        assert!(JobStatus::Rendering.can_advance_to(JobStatus::Failed));
        assert!(JobStatus::Pending.can_advance_to(JobStatus::Cancelled));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::FetchingData,
            JobStatus::PostProduction,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_coordinates_serialize_as_pair() {
        let json = serde_json::to_string(&Coordinates::new(36.5683, -121.9497)).unwrap();
        assert_eq!(json, "[36.5683,-121.9497]");

        let parsed: Coordinates = serde_json::from_str("[56.3398,-2.7967]").unwrap();
        assert_eq!(parsed, Coordinates::new(56.3398, -2.7967));
    }

    #[test]
    fn test_coordinates_validity() {
        assert!(Coordinates::new(0.0, 0.0).is_valid());
        assert!(!Coordinates::new(91.0, 0.0).is_valid());
        assert!(!Coordinates::new(0.0, -181.0).is_valid());
        assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new(request("Bacon Park Golf Course"));
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.output.is_none());
        assert!(job.errors.is_empty());
        assert!(job.completed_at.is_none());
        assert!(job.is_active());
    }

    #[test]
    fn test_job_serializes_camel_case() {
        let job = Job::new(request("Pinehurst No. 2"));
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["subjectName"], "Pinehurst No. 2");
        assert_eq!(value["status"], "pending");
        assert!(value.get("completedAt").is_none());
        assert!(value.get("output").is_none());
    }

    #[test]
    fn test_snapshot_mirrors_job() {
        let mut job = Job::new(request("Augusta National Golf Club"));
        job.fallbacks.push(FallbackRecord::new(
            JobStatus::FetchingData,
            "weather provider offline",
            "clear skies",
        ));
        let snapshot = job.snapshot();
        assert_eq!(snapshot.id, job.id);
        assert_eq!(snapshot.fallbacks.len(), 1);
        assert_eq!(snapshot.fallbacks[0].stage, JobStatus::FetchingData);
    }
}
