use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::Coordinates;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_temp_directory")]
    pub temp_directory: PathBuf,
    /// Public prefix for delivered artifact URLs.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// SQLite file for job records. Jobs are kept in memory when absent.
    #[serde(default)]
    pub database: Option<PathBuf>,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub errors: ErrorLogConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("outputs/videos")
}

fn default_temp_directory() -> PathBuf {
    std::env::temp_dir().join("golfvision")
}

fn default_base_url() -> String {
    "http://localhost:4000".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            output_directory: default_output_directory(),
            temp_directory: default_temp_directory(),
            base_url: default_base_url(),
            database: None,
            publisher: PublisherConfig::default(),
            enrichment: EnrichmentConfig::default(),
            engines: EnginesConfig::default(),
            video: VideoConfig::default(),
            retry: RetryConfig::default(),
            errors: ErrorLogConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    100
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Query remote providers. When off only the built-in gazetteer is used.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,
    #[serde(default = "default_open_meteo_url")]
    pub open_meteo_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Substituted when geocoding fails.
    #[serde(default = "default_coordinates")]
    pub default_coordinates: Coordinates,
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_open_meteo_url() -> String {
    "https://api.open-meteo.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_coordinates() -> Coordinates {
    Coordinates::new(40.7128, -74.0060)
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            nominatim_url: default_nominatim_url(),
            open_meteo_url: default_open_meteo_url(),
            request_timeout_secs: default_request_timeout_secs(),
            default_coordinates: default_coordinates(),
        }
    }
}

/// A native engine command line.
///
/// Arguments may contain `{placeholders}` filled in per invocation:
/// `{job_id}`, `{workspace}`, `{script}`, `{input}`, `{output}`,
/// `{frames}`, `{audio}`, `{fps}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_max_output_bytes() -> usize {
    10 * 1024 * 1024
}

impl EngineCommand {
    fn new(program: &str, args: &[&str], timeout_secs: u64) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    #[serde(default = "default_model_command")]
    pub model: EngineCommand,
    #[serde(default = "default_render_command")]
    pub render: EngineCommand,
    #[serde(default = "default_speech_command")]
    pub speech: EngineCommand,
    #[serde(default = "default_encode_command")]
    pub encode: EngineCommand,
    #[serde(default = "default_thumbnail_command")]
    pub thumbnail: EngineCommand,
    #[serde(default = "default_probe_command")]
    pub probe: EngineCommand,
}

fn default_model_command() -> EngineCommand {
    EngineCommand::new(
        "blender",
        &["--background", "--python", "{script}", "--", "{output}"],
        300,
    )
}

fn default_render_command() -> EngineCommand {
    EngineCommand::new(
        "blender",
        &["--background", "{input}", "--python", "{script}", "--", "{output}"],
        120,
    )
}

fn default_speech_command() -> EngineCommand {
    EngineCommand::new("gtts-cli", &["--file", "{input}", "--output", "{output}"], 60)
}

fn default_encode_command() -> EngineCommand {
    EngineCommand::new(
        "ffmpeg",
        &[
            "-y", "-framerate", "{fps}", "-i", "{frames}", "-i", "{audio}", "-c:v", "libx264",
            "-preset", "medium", "-crf", "23", "-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a",
            "128k", "-shortest", "{output}",
        ],
        300,
    )
}

fn default_thumbnail_command() -> EngineCommand {
    EngineCommand::new(
        "ffmpeg",
        &[
            "-y", "-ss", "2", "-i", "{input}", "-vframes", "1", "-vf", "scale=640:360",
            "{output}",
        ],
        60,
    )
}

fn default_probe_command() -> EngineCommand {
    EngineCommand::new(
        "ffprobe",
        &[
            "-v", "quiet", "-print_format", "json", "-show_format", "-show_streams", "{input}",
        ],
        30,
    )
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            model: default_model_command(),
            render: default_render_command(),
            speech: default_speech_command(),
            encode: default_encode_command(),
            thumbnail: default_thumbnail_command(),
            probe: default_probe_command(),
        }
    }
}

impl EnginesConfig {
    pub fn named(&self) -> [(&'static str, &EngineCommand); 6] {
        [
            ("model", &self.model),
            ("render", &self.render),
            ("speech", &self.speech),
            ("encode", &self.encode),
            ("thumbnail", &self.thumbnail),
            ("probe", &self.probe),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_seconds_per_hole")]
    pub seconds_per_hole: f64,
}

fn default_fps() -> u32 {
    30
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_seconds_per_hole() -> f64 {
    3.0
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            width: default_width(),
            height: default_height(),
            seconds_per_hole: default_seconds_per_hole(),
        }
    }
}

/// Retry around production engine calls. One attempt means no retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogConfig {
    /// Resolved reports older than this are swept.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_sweep_interval_hours")]
    pub sweep_interval_hours: u64,
    /// JSON file the error log is mirrored to.
    #[serde(default)]
    pub persist_path: Option<PathBuf>,
}

fn default_retention_days() -> u32 {
    30
}

fn default_sweep_interval_hours() -> u64 {
    24
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_hours: default_sweep_interval_hours(),
            persist_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Also `pkill -f` by job ID / workspace path when cancelling.
    #[serde(default = "default_true")]
    pub orphan_sweep: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { orphan_sweep: true }
    }
}
