//! Values passed across the engine boundary.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::{Coordinates, JobId};

/// Per-job information every engine call receives.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub job_id: JobId,
    /// Scratch directory owned by the job; removed after delivery.
    pub workspace: PathBuf,
    pub seed: u64,
}

impl EngineContext {
    /// Path inside the workspace, prefixed with the job ID so process
    /// command lines can be matched by it.
    pub fn artifact(&self, name: &str) -> PathBuf {
        self.workspace.join(format!("{}_{}", self.job_id, name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainClass {
    Flat,
    RollingHills,
    Mountainous,
    Coastal,
}

impl fmt::Display for TerrainClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainClass::Flat => write!(f, "flat"),
            TerrainClass::RollingHills => write!(f, "rolling hills"),
            TerrainClass::Mountainous => write!(f, "mountainous"),
            TerrainClass::Coastal => write!(f, "coastal"),
        }
    }
}

/// Elevation samples in metres over a grid centred on the course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElevationProfile {
    pub samples: Vec<f64>,
    pub terrain: TerrainClass,
}

impl ElevationProfile {
    /// Classifies terrain from raw samples.
    pub fn from_samples(samples: Vec<f64>) -> Self {
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let terrain = if samples.is_empty() {
            TerrainClass::Flat
        } else if min < 5.0 {
            TerrainClass::Coastal
        } else if max - min < 10.0 {
            TerrainClass::Flat
        } else if max - min < 40.0 {
            TerrainClass::RollingHills
        } else {
            TerrainClass::Mountainous
        };
        Self { samples, terrain }
    }

    pub fn relief(&self) -> f64 {
        let min = self.samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if self.samples.is_empty() {
            0.0
        } else {
            max - min
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageryTile {
    pub provider: String,
    /// Ground resolution in metres per pixel.
    pub resolution_m: f64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hole {
    pub number: u8,
    pub par: u8,
    pub length_yards: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseLayout {
    pub holes: Vec<Hole>,
    pub features: Vec<String>,
}

impl CourseLayout {
    pub fn total_par(&self) -> u32 {
        self.holes.iter().map(|h| u32::from(h.par)).sum()
    }

    pub fn total_length(&self) -> u32 {
        self.holes.iter().map(|h| h.length_yards).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub summary: String,
    pub temperature_c: Option<f64>,
    pub wind_kph: Option<f64>,
}

/// Everything known about the subject after enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseData {
    pub name: String,
    pub coordinates: Coordinates,
    pub elevation: ElevationProfile,
    pub imagery: ImageryTile,
    pub layout: CourseLayout,
    pub weather: WeatherReport,
}

/// Built scene ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelHandle {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraShot {
    pub hole: u8,
    pub frames: u32,
    pub altitude_m: f64,
    pub heading_deg: f64,
    pub orbit_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraPlan {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub shots: Vec<CameraShot>,
}

impl CameraPlan {
    pub fn total_frames(&self) -> u32 {
        self.shots.iter().map(|s| s.frames).sum()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.fps == 0 {
            return 0.0;
        }
        f64::from(self.total_frames()) / f64::from(self.fps)
    }
}

/// Rendered image sequence on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    pub directory: PathBuf,
    /// printf-style file pattern, e.g. `frame_%04d.png`.
    pub pattern: String,
    pub count: u32,
    pub fps: u32,
}

impl FrameSet {
    pub fn input_pattern(&self) -> PathBuf {
        self.directory.join(&self.pattern)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrationScript {
    pub lines: Vec<String>,
}

impl NarrationScript {
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
    pub file_size: u64,
}

impl VideoMetadata {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVideo {
    pub path: PathBuf,
    pub thumbnail: PathBuf,
    pub metadata: VideoMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredArtifacts {
    pub video_url: String,
    pub captions_url: String,
    pub thumbnail_url: String,
}
