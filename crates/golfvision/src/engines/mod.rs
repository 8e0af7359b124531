//! Collaborator boundary: enrichment providers and production engines.
//!
//! The pipeline only inspects success/failure and the returned handles.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::Coordinates;
use crate::supervisor::SupervisorError;

pub mod command;
pub mod delivery;
pub mod gazetteer;
pub mod http;
pub mod types;
pub mod unavailable;

pub use command::{BlenderModelBuilder, BlenderRenderer, FfmpegEncoder, GttsSynthesizer};
pub use delivery::LocalDelivery;
pub use gazetteer::{Gazetteer, GeocoderChain};
pub use http::{NominatimGeocoder, OpenMeteoClient};
pub use types::*;
pub use unavailable::Unconfigured;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0} is not available")]
    Unavailable(String),

    /// No provider is wired for this source at all.
    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("No match for '{0}'")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Process(#[from] SupervisorError),

    #[error("Engine did not produce '{}'", .0.display())]
    MissingArtifact(PathBuf),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, EngineError::NotConfigured(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Process(SupervisorError::Timeout { .. }))
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, name: &str) -> Result<Coordinates, EngineError>;
}

#[async_trait]
pub trait ElevationSource: Send + Sync {
    async fn elevation_profile(&self, at: Coordinates) -> Result<ElevationProfile, EngineError>;
}

#[async_trait]
pub trait ImagerySource: Send + Sync {
    async fn imagery(&self, at: Coordinates) -> Result<ImageryTile, EngineError>;
}

#[async_trait]
pub trait LayoutSource: Send + Sync {
    async fn course_layout(&self, at: Coordinates) -> Result<CourseLayout, EngineError>;
}

#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn weather(&self, at: Coordinates) -> Result<WeatherReport, EngineError>;
}

#[async_trait]
pub trait ModelBuilder: Send + Sync {
    async fn build_model(
        &self,
        ctx: &EngineContext,
        course: &CourseData,
    ) -> Result<ModelHandle, EngineError>;
}

#[async_trait]
pub trait FrameRenderer: Send + Sync {
    async fn render_frames(
        &self,
        ctx: &EngineContext,
        model: &ModelHandle,
        plan: &CameraPlan,
    ) -> Result<FrameSet, EngineError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        ctx: &EngineContext,
        script: &NarrationScript,
    ) -> Result<AudioTrack, EngineError>;
}

#[async_trait]
pub trait VideoEncoder: Send + Sync {
    async fn encode(
        &self,
        ctx: &EngineContext,
        frames: &FrameSet,
        audio: &AudioTrack,
    ) -> Result<EncodedVideo, EngineError>;
}

#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        ctx: &EngineContext,
        video: &EncodedVideo,
        captions_srt: &str,
    ) -> Result<DeliveredArtifacts, EngineError>;
}

/// The full set of adapters a pipeline drives.
#[derive(Clone)]
pub struct Engines {
    pub geocoder: Arc<dyn Geocoder>,
    pub elevation: Arc<dyn ElevationSource>,
    pub imagery: Arc<dyn ImagerySource>,
    pub layout: Arc<dyn LayoutSource>,
    pub weather: Arc<dyn WeatherSource>,
    pub model_builder: Arc<dyn ModelBuilder>,
    pub renderer: Arc<dyn FrameRenderer>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub encoder: Arc<dyn VideoEncoder>,
    pub deliverer: Arc<dyn Deliverer>,
}
