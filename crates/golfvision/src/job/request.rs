//! Submission payload and its validation.

use serde::{Deserialize, Serialize};

use super::model::Coordinates;
use crate::error::ValidationError;

pub const MAX_SUBJECT_LEN: usize = 200;
pub const MAX_SEED: u64 = 999_999;

/// A request to render a video for a named location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub subject_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SubmitRequest {
    pub fn new(subject_name: impl Into<String>) -> Self {
        Self {
            subject_name: subject_name.into(),
            coordinates: None,
            seed: None,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.coordinates = Some(Coordinates::new(lat, lng));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks the request and returns it with the subject name trimmed.
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        let trimmed = self.subject_name.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySubject);
        }
        let len = trimmed.chars().count();
        if len > MAX_SUBJECT_LEN {
            return Err(ValidationError::SubjectTooLong {
                len,
                max: MAX_SUBJECT_LEN,
            });
        }
        if trimmed.len() != self.subject_name.len() {
            self.subject_name = trimmed.to_string();
        }

        if let Some(coords) = self.coordinates {
            if !coords.is_valid() {
                return Err(ValidationError::CoordinatesOutOfRange {
                    lat: coords.lat,
                    lng: coords.lng,
                });
            }
        }

        if let Some(seed) = self.seed {
            if seed > MAX_SEED {
                return Err(ValidationError::SeedOutOfRange {
                    seed,
                    max: MAX_SEED,
                });
            }
        }

        Ok(self)
    }
}
