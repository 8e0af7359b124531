#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};

use golfvision::engines::{
    AudioTrack, CameraPlan, CourseData, CourseLayout, DeliveredArtifacts, Deliverer,
    ElevationProfile, ElevationSource, EncodedVideo, EngineContext, EngineError, Engines,
    FrameRenderer, FrameSet, Gazetteer, Geocoder, ImagerySource, ImageryTile, LayoutSource,
    ModelBuilder, ModelHandle, NarrationScript, SpeechSynthesizer, VideoEncoder, VideoMetadata,
    WeatherReport, WeatherSource,
};
use golfvision::{Config, Coordinates, GolfVision, JobEvent, JobId, JobStatus};

/// Engines that never touch the network or spawn processes. Each adapter
/// can be told to fail; rendering can be parked until released.
#[derive(Default)]
pub struct FakeEngines {
    pub fail_geocode: AtomicBool,
    pub fail_elevation: AtomicBool,
    pub fail_imagery: AtomicBool,
    pub fail_layout: AtomicBool,
    pub fail_weather: AtomicBool,
    /// Number of upcoming model builds that fail.
    pub fail_model_times: AtomicU32,
    pub fail_render: AtomicBool,
    /// Number of upcoming renders that wait for [`release_renders`].
    pub hold_renders: AtomicUsize,
    gate: Notify,
    calls: Mutex<Vec<String>>,
}

impl FakeEngines {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn engines(self: &Arc<Self>) -> Engines {
        Engines {
            geocoder: self.clone(),
            elevation: self.clone(),
            imagery: self.clone(),
            layout: self.clone(),
            weather: self.clone(),
            model_builder: self.clone(),
            renderer: self.clone(),
            speech: self.clone(),
            encoder: self.clone(),
            deliverer: self.clone(),
        }
    }

    pub fn release_renders(&self) {
        self.gate.notify_waiters();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, engine: &str) -> Vec<String> {
        let prefix = format!("{}:", engine);
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix))
            .collect()
    }

    fn record(&self, engine: &str, subject: impl std::fmt::Display) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", engine, subject));
    }
}

fn unavailable(what: &str) -> EngineError {
    EngineError::Unavailable(what.to_string())
}

#[async_trait]
impl Geocoder for FakeEngines {
    async fn geocode(&self, name: &str) -> Result<Coordinates, EngineError> {
        self.record("geocode", name);
        if self.fail_geocode.load(Ordering::SeqCst) {
            return Err(unavailable("geocoder"));
        }
        Gazetteer::new().geocode(name).await
    }
}

#[async_trait]
impl ElevationSource for FakeEngines {
    async fn elevation_profile(&self, at: Coordinates) -> Result<ElevationProfile, EngineError> {
        self.record("elevation", at);
        if self.fail_elevation.load(Ordering::SeqCst) {
            return Err(unavailable("elevation"));
        }
        Ok(ElevationProfile::from_samples(vec![3.0, 12.0, 28.0, 41.0]))
    }
}

#[async_trait]
impl ImagerySource for FakeEngines {
    async fn imagery(&self, at: Coordinates) -> Result<ImageryTile, EngineError> {
        self.record("imagery", at);
        if self.fail_imagery.load(Ordering::SeqCst) {
            return Err(unavailable("imagery"));
        }
        Ok(ImageryTile {
            provider: "fake".to_string(),
            resolution_m: 0.5,
            url: Some("https://tiles.example.test/1/2/3.png".to_string()),
        })
    }
}

#[async_trait]
impl LayoutSource for FakeEngines {
    async fn course_layout(&self, at: Coordinates) -> Result<CourseLayout, EngineError> {
        self.record("layout", at);
        if self.fail_layout.load(Ordering::SeqCst) {
            return Err(unavailable("layout"));
        }
        Ok(CourseLayout {
            holes: (1..=9)
                .map(|number| golfvision::engines::Hole {
                    number,
                    par: 4,
                    length_yards: 400,
                })
                .collect(),
            features: vec!["ocean_views".to_string()],
        })
    }
}

#[async_trait]
impl WeatherSource for FakeEngines {
    async fn weather(&self, at: Coordinates) -> Result<WeatherReport, EngineError> {
        self.record("weather", at);
        if self.fail_weather.load(Ordering::SeqCst) {
            return Err(EngineError::Other("connection reset by peer".to_string()));
        }
        Ok(WeatherReport {
            summary: "Foggy, 14°C".to_string(),
            temperature_c: Some(14.0),
            wind_kph: Some(12.0),
        })
    }
}

#[async_trait]
impl ModelBuilder for FakeEngines {
    async fn build_model(
        &self,
        ctx: &EngineContext,
        _course: &CourseData,
    ) -> Result<ModelHandle, EngineError> {
        self.record("build_model", &ctx.job_id);
        let remaining = self.fail_model_times.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_model_times.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::MissingArtifact(ctx.artifact("course.blend")));
        }
        Ok(ModelHandle {
            path: ctx.artifact("course.blend"),
        })
    }
}

#[async_trait]
impl FrameRenderer for FakeEngines {
    async fn render_frames(
        &self,
        ctx: &EngineContext,
        _model: &ModelHandle,
        plan: &CameraPlan,
    ) -> Result<FrameSet, EngineError> {
        self.record("render", &ctx.job_id);
        let hold = self
            .hold_renders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hold {
            self.gate.notified().await;
        }
        if self.fail_render.load(Ordering::SeqCst) {
            return Err(unavailable("renderer"));
        }
        Ok(FrameSet {
            directory: ctx.artifact("frames"),
            pattern: "frame_%04d.png".to_string(),
            count: plan.total_frames(),
            fps: plan.fps,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeEngines {
    async fn synthesize(
        &self,
        ctx: &EngineContext,
        _script: &NarrationScript,
    ) -> Result<AudioTrack, EngineError> {
        self.record("speech", &ctx.job_id);
        Ok(AudioTrack {
            path: ctx.artifact("narration.mp3"),
        })
    }
}

#[async_trait]
impl VideoEncoder for FakeEngines {
    async fn encode(
        &self,
        ctx: &EngineContext,
        frames: &FrameSet,
        _audio: &AudioTrack,
    ) -> Result<EncodedVideo, EngineError> {
        self.record("encode", &ctx.job_id);
        Ok(EncodedVideo {
            path: ctx.artifact("video.mp4"),
            thumbnail: ctx.artifact("thumbnail.jpg"),
            metadata: VideoMetadata {
                duration_secs: f64::from(frames.count) / f64::from(frames.fps.max(1)),
                width: 1920,
                height: 1080,
                fps: frames.fps,
                codec: "h264".to_string(),
                file_size: 4096,
            },
        })
    }
}

#[async_trait]
impl Deliverer for FakeEngines {
    async fn deliver(
        &self,
        ctx: &EngineContext,
        _video: &EncodedVideo,
        captions_srt: &str,
    ) -> Result<DeliveredArtifacts, EngineError> {
        self.record("deliver", &ctx.job_id);
        assert!(captions_srt.starts_with("1\n00:00:00,000 --> "));
        let base = format!("http://localhost:4000/outputs/videos/{}", ctx.job_id);
        Ok(DeliveredArtifacts {
            video_url: format!("{}/video.mp4", base),
            captions_url: format!("{}/captions.srt", base),
            thumbnail_url: format!("{}/thumbnail.jpg", base),
        })
    }
}

// ─── Service setup ───

/// Config pointing every directory into `dir`, with process sweeps off.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.temp_directory = dir.join("work");
    config.output_directory = dir.join("videos");
    config.enrichment.enabled = false;
    config.supervisor.orphan_sweep = false;
    config.video.seconds_per_hole = 0.1;
    config
}

pub struct Harness {
    pub service: GolfVision,
    pub fakes: Arc<FakeEngines>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        Self::build(adjust, |_| {})
    }

    /// Fakes everywhere except where `swap` replaces an adapter.
    pub fn with_engines(swap: impl FnOnce(&mut Engines)) -> Self {
        Self::build(|_| {}, swap)
    }

    fn build(adjust: impl FnOnce(&mut Config), swap: impl FnOnce(&mut Engines)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        adjust(&mut config);
        let fakes = FakeEngines::new();
        let mut engines = fakes.engines();
        swap(&mut engines);
        let service = GolfVision::with_engines(config, engines).unwrap();
        Self {
            service,
            fakes,
            dir,
        }
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    pub async fn wait_for_status(&self, id: &JobId, status: JobStatus) {
        for _ in 0..400 {
            let current = self.service.get(id).unwrap().map(|j| j.status);
            if current == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {}", id, status);
    }
}

/// Drains whatever is already buffered on a global receiver.
pub fn drain_events(rx: &mut broadcast::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn events_for<'a>(events: &'a [JobEvent], id: &'a JobId) -> impl Iterator<Item = &'a JobEvent> {
    events.iter().filter(move |e| e.job_id() == id)
}

/// Status carried by each event, in order.
pub fn statuses(events: &[JobEvent], id: &JobId) -> Vec<JobStatus> {
    events_for(events, id)
        .map(|e| match e {
            JobEvent::Update(snapshot) => snapshot.status,
            JobEvent::Complete(job) => job.status,
            JobEvent::Error { snapshot, .. } => snapshot.status,
        })
        .collect()
}
