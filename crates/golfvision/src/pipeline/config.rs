use std::path::PathBuf;

use crate::config::{Config, VideoConfig};
use crate::job::Coordinates;

use super::retry::RetryPolicy;

/// The slice of [`Config`] the pipeline runner needs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Per-job workspaces are created below this directory.
    pub temp_directory: PathBuf,
    pub default_coordinates: Coordinates,
    pub video: VideoConfig,
    pub retry: RetryPolicy,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            temp_directory: config.temp_directory.clone(),
            default_coordinates: config.enrichment.default_coordinates,
            video: config.video.clone(),
            retry: RetryPolicy::from_config(&config.retry),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
