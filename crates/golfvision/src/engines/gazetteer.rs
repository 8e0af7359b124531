//! Offline geocoding for well-known courses.

use std::sync::Arc;

use async_trait::async_trait;

use super::{EngineError, Geocoder};
use crate::job::Coordinates;

const KNOWN_COURSES: &[(&str, Coordinates)] = &[
    ("Bacon Park Golf Course", Coordinates::new(32.0748, -81.0943)),
    ("Augusta National Golf Club", Coordinates::new(33.5021, -82.0228)),
    ("Pebble Beach Golf Links", Coordinates::new(36.5683, -121.9497)),
    ("St. Andrews Old Course", Coordinates::new(56.3398, -2.7967)),
    ("Pinehurst No. 2", Coordinates::new(35.1894, -79.4697)),
];

fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Resolves names from a fixed table; unknown names are `NotFound`.
#[derive(Debug, Clone)]
pub struct Gazetteer {
    entries: Vec<(String, Coordinates)>,
}

impl Gazetteer {
    pub fn new() -> Self {
        Self {
            entries: KNOWN_COURSES
                .iter()
                .map(|(name, coords)| (normalize(name), *coords))
                .collect(),
        }
    }

    pub fn with_entry(mut self, name: &str, coords: Coordinates) -> Self {
        self.entries.push((normalize(name), coords));
        self
    }

    pub fn lookup(&self, name: &str) -> Option<Coordinates> {
        let key = normalize(name);
        self.entries
            .iter()
            .find(|(entry, _)| *entry == key)
            .map(|(_, coords)| *coords)
    }
}

impl Default for Gazetteer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Geocoder for Gazetteer {
    async fn geocode(&self, name: &str) -> Result<Coordinates, EngineError> {
        self.lookup(name)
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }
}

/// Tries each geocoder in order and returns the first hit.
pub struct GeocoderChain {
    links: Vec<Arc<dyn Geocoder>>,
}

impl GeocoderChain {
    pub fn new(links: Vec<Arc<dyn Geocoder>>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl Geocoder for GeocoderChain {
    async fn geocode(&self, name: &str) -> Result<Coordinates, EngineError> {
        let mut last_err = EngineError::Unavailable("geocoding".to_string());
        for link in &self.links {
            match link.geocode(name).await {
                Ok(coords) => return Ok(coords),
                Err(e) => {
                    log::debug!("Geocoder miss for '{}': {}", name, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_known_course() {
        let coords = Gazetteer::new()
            .geocode("Pebble Beach Golf Links")
            .await
            .unwrap();
        assert_eq!(coords, Coordinates::new(36.5683, -121.9497));
    }

    #[tokio::test]
    async fn test_lookup_ignores_case_and_spacing() {
        let g = Gazetteer::new();
        assert_eq!(
            g.lookup("  st. andrews   OLD course"),
            Some(Coordinates::new(56.3398, -2.7967))
        );
    }

    #[tokio::test]
    async fn test_unknown_course_is_not_found() {
        let err = Gazetteer::new().geocode("Nowhere Links").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(ref n) if n == "Nowhere Links"));
    }

    #[tokio::test]
    async fn test_chain_falls_through() {
        let empty = Gazetteer { entries: vec![] };
        let custom = Gazetteer { entries: vec![] }.with_entry("Home Club", Coordinates::new(1.0, 2.0));
        let chain = GeocoderChain::new(vec![Arc::new(empty), Arc::new(custom)]);
        assert_eq!(chain.geocode("home club").await.unwrap(), Coordinates::new(1.0, 2.0));
        assert!(chain.geocode("elsewhere").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let chain = GeocoderChain::new(vec![]);
        assert!(matches!(
            chain.geocode("x").await.unwrap_err(),
            EngineError::Unavailable(_)
        ));
    }
}
