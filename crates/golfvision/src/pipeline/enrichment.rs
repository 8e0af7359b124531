//! Deterministic defaults substituted when an enrichment provider fails.

use crate::engines::{CourseLayout, ElevationProfile, Hole, ImageryTile, WeatherReport};

const FLAT_ELEVATION_M: f64 = 50.0;

/// Pars of the synthetic par-72 layout: two identical nines.
const SYNTHETIC_PARS: [u8; 9] = [4, 4, 3, 5, 4, 4, 3, 4, 5];

pub const FALLBACK_COORDINATES: &str = "default coordinates";
pub const FALLBACK_ELEVATION: &str = "flat terrain";
pub const FALLBACK_IMAGERY: &str = "untextured terrain";
pub const FALLBACK_LAYOUT: &str = "synthetic 18-hole layout";
pub const FALLBACK_WEATHER: &str = "clear skies";

pub fn flat_elevation() -> ElevationProfile {
    ElevationProfile::from_samples(vec![FLAT_ELEVATION_M; 9])
}

pub fn default_imagery() -> ImageryTile {
    ImageryTile {
        provider: "none".to_string(),
        resolution_m: 1.0,
        url: None,
    }
}

fn synthetic_length(par: u8) -> u32 {
    match par {
        3 => 175,
        5 => 540,
        _ => 410,
    }
}

pub fn synthetic_layout() -> CourseLayout {
    let holes = SYNTHETIC_PARS
        .iter()
        .chain(SYNTHETIC_PARS.iter())
        .zip(1u8..)
        .map(|(&par, number)| Hole {
            number,
            par,
            length_yards: synthetic_length(par),
        })
        .collect();

    CourseLayout {
        holes,
        features: [
            "water_hazards",
            "sand_bunkers",
            "elevated_greens",
            "tree_obstacles",
        ]
        .iter()
        .map(|f| f.to_string())
        .collect(),
    }
}

pub fn default_weather() -> WeatherReport {
    WeatherReport {
        summary: "Clear skies".to_string(),
        temperature_c: None,
        wind_kph: None,
    }
}
