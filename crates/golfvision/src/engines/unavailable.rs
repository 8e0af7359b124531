use async_trait::async_trait;

use super::{
    CourseLayout, ElevationProfile, ElevationSource, EngineError, Geocoder, ImageryTile,
    ImagerySource, LayoutSource, WeatherReport, WeatherSource,
};
use crate::job::Coordinates;

/// Stand-in for an enrichment provider that is not configured. Every call
/// fails with [`EngineError::NotConfigured`], so the pipeline substitutes its
/// default without raising a warning.
#[derive(Debug, Clone)]
pub struct Unconfigured {
    what: String,
}

impl Unconfigured {
    pub fn new(what: impl Into<String>) -> Self {
        Self { what: what.into() }
    }

    fn err(&self) -> EngineError {
        EngineError::NotConfigured(self.what.clone())
    }
}

#[async_trait]
impl Geocoder for Unconfigured {
    async fn geocode(&self, _name: &str) -> Result<Coordinates, EngineError> {
        Err(self.err())
    }
}

#[async_trait]
impl ElevationSource for Unconfigured {
    async fn elevation_profile(&self, _at: Coordinates) -> Result<ElevationProfile, EngineError> {
        Err(self.err())
    }
}

#[async_trait]
impl ImagerySource for Unconfigured {
    async fn imagery(&self, _at: Coordinates) -> Result<ImageryTile, EngineError> {
        Err(self.err())
    }
}

#[async_trait]
impl LayoutSource for Unconfigured {
    async fn course_layout(&self, _at: Coordinates) -> Result<CourseLayout, EngineError> {
        Err(self.err())
    }
}

#[async_trait]
impl WeatherSource for Unconfigured {
    async fn weather(&self, _at: Coordinates) -> Result<WeatherReport, EngineError> {
        Err(self.err())
    }
}
