use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::engines::{CourseData, EngineError, Engines};
use crate::job::{Coordinates, FallbackRecord, Job, JobId, JobOutput, JobStatus, OutputMetadata};
use crate::recorder::{ErrorRecorder, ErrorReport, PerformanceLog, PerformanceRecorder, ReportKind, Severity};
use crate::scheduler::{JobLedger, JobRunner, Transition};

use super::config::PipelineSettings;
use super::context::PipelineContext;
use super::enrichment::{
    default_imagery, default_weather, flat_elevation, synthetic_layout, FALLBACK_COORDINATES,
    FALLBACK_ELEVATION, FALLBACK_IMAGERY, FALLBACK_LAYOUT, FALLBACK_WEATHER,
};
use super::error::{PipelineOutcome, StageError};
use super::storyboard;

/// Races `work` against cancellation of the job.
async fn guarded<F: Future>(cancel: &CancellationToken, work: F) -> Result<F::Output, StageError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StageError::Cancelled),
        out = work => Ok(out),
    }
}

fn stopped_if_not_applied(transition: Transition) -> Result<(), StageError> {
    match transition {
        Transition::Applied => Ok(()),
        Transition::Stopped => Err(StageError::Cancelled),
    }
}

async fn cleanup_workspace(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed workspace {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to clean up workspace {}: {}", path.display(), e),
    }
}

pub struct Pipeline {
    engines: Engines,
    ledger: Arc<JobLedger>,
    errors: Arc<ErrorRecorder>,
    performance: Arc<PerformanceRecorder>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        engines: Engines,
        ledger: Arc<JobLedger>,
        errors: Arc<ErrorRecorder>,
        performance: Arc<PerformanceRecorder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            engines,
            ledger,
            errors,
            performance,
            settings,
        }
    }

    /// Drives one job from `pending` to a terminal status.
    ///
    /// Never returns an error: failures are recorded on the job and in the
    /// error log, cancellation ends the run quietly.
    pub async fn run(&self, job: Job, cancel: CancellationToken) -> PipelineOutcome {
        let span = info_span!("pipeline", job_id = %job.id, subject = %job.subject_name);
        async move {
            let ctx = PipelineContext::new(job, &self.settings.temp_directory);
            let job_id = ctx.job_id().clone();
            let workspace = ctx.workspace().clone();

            let outcome = match self.execute(&ctx, &cancel).await {
                Ok(()) => {
                    info!(render_time_ms = ctx.render_time_ms(), "Pipeline completed");
                    PipelineOutcome::Completed
                }
                Err(StageError::Cancelled) => {
                    info!("Pipeline stopped: job cancelled");
                    PipelineOutcome::Cancelled
                }
                Err(err) => self.handle_failure(&job_id, &err),
            };

            cleanup_workspace(&workspace).await;
            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, ctx: &PipelineContext, cancel: &CancellationToken) -> Result<(), StageError> {
        // geocoding
        self.enter(ctx, JobStatus::Geocoding, cancel)?;
        let coordinates = self
            .step_geocode(ctx, cancel)
            .instrument(info_span!("geocoding"))
            .await?;
        self.checkpoint(ctx, cancel)?;

        // fetching_data
        self.enter(ctx, JobStatus::FetchingData, cancel)?;
        let course = self
            .step_fetch_data(ctx, coordinates, cancel)
            .instrument(info_span!("fetching_data"))
            .await?;
        self.checkpoint(ctx, cancel)?;

        // building_model
        self.enter(ctx, JobStatus::BuildingModel, cancel)?;
        let workspace = ctx.workspace();
        tokio::fs::create_dir_all(workspace)
            .await
            .map_err(|e| StageError::Workspace {
                path: workspace.clone(),
                source: e,
            })?;
        let model = self
            .produce(ctx, JobStatus::BuildingModel, cancel, || {
                self.engines.model_builder.build_model(&ctx.engine, &course)
            })
            .instrument(info_span!("building_model"))
            .await?;
        self.checkpoint(ctx, cancel)?;

        // rendering
        self.enter(ctx, JobStatus::Rendering, cancel)?;
        let plan = storyboard::camera_plan(&course.layout, ctx.engine.seed, &self.settings.video);
        debug!(
            shots = plan.shots.len(),
            frames = plan.total_frames(),
            "Camera plan ready"
        );
        let frames = self
            .produce(ctx, JobStatus::Rendering, cancel, || {
                self.engines.renderer.render_frames(&ctx.engine, &model, &plan)
            })
            .instrument(info_span!("rendering"))
            .await?;
        self.checkpoint(ctx, cancel)?;

        // post_production
        self.enter(ctx, JobStatus::PostProduction, cancel)?;
        let script = storyboard::narration_script(&course);
        let audio = self
            .produce(ctx, JobStatus::PostProduction, cancel, || {
                self.engines.speech.synthesize(&ctx.engine, &script)
            })
            .instrument(info_span!("narration"))
            .await?;
        let video = self
            .produce(ctx, JobStatus::PostProduction, cancel, || {
                self.engines.encoder.encode(&ctx.engine, &frames, &audio)
            })
            .instrument(info_span!("encoding"))
            .await?;
        let duration = if video.metadata.duration_secs > 0.0 {
            video.metadata.duration_secs
        } else {
            plan.duration_secs()
        };
        let captions = storyboard::captions_srt(&script, duration);
        self.checkpoint(ctx, cancel)?;

        // deliver
        self.enter(ctx, JobStatus::Deliver, cancel)?;
        let artifacts = self
            .produce(ctx, JobStatus::Deliver, cancel, || {
                self.engines.deliverer.deliver(&ctx.engine, &video, &captions)
            })
            .instrument(info_span!("deliver"))
            .await?;
        self.checkpoint(ctx, cancel)?;

        let output = JobOutput {
            video_url: artifacts.video_url,
            captions_url: artifacts.captions_url,
            thumbnail_url: artifacts.thumbnail_url,
            metadata: OutputMetadata {
                duration,
                resolution: video.metadata.resolution(),
                file_size: video.metadata.file_size,
                render_time: ctx.render_time_ms(),
                fps: video.metadata.fps,
                codec: video.metadata.codec.clone(),
            },
        };
        stopped_if_not_applied(self.ledger.complete(ctx.job_id(), output)?)
    }

    // ─── Checkpoints ────────────────────────────────────────────────────────

    fn enter(&self, ctx: &PipelineContext, status: JobStatus, cancel: &CancellationToken) -> Result<(), StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        stopped_if_not_applied(self.ledger.advance(ctx.job_id(), status)?)?;
        info!(stage = %status, "Stage started");
        Ok(())
    }

    fn checkpoint(&self, ctx: &PipelineContext, cancel: &CancellationToken) -> Result<(), StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        match self.ledger.get(ctx.job_id())? {
            Some(job) if job.is_active() => Ok(()),
            _ => Err(StageError::Cancelled),
        }
    }

    // ─── Enrichment ─────────────────────────────────────────────────────────

    async fn step_geocode(&self, ctx: &PipelineContext, cancel: &CancellationToken) -> Result<Coordinates, StageError> {
        let started = Instant::now();

        if let Some(at) = ctx.job.coordinates {
            debug!("Using submitted coordinates {}", at);
            self.log_attempt(ctx.job_id(), JobStatus::Geocoding, 1, started, None);
            return Ok(at);
        }

        let at = match guarded(cancel, self.engines.geocoder.geocode(&ctx.job.subject_name)).await? {
            Ok(at) => at,
            Err(e) => {
                let at = self.settings.default_coordinates;
                self.fallback(
                    ctx,
                    JobStatus::Geocoding,
                    "geocoder",
                    &e,
                    &format!("{} {}", FALLBACK_COORDINATES, at),
                )?;
                at
            }
        };

        stopped_if_not_applied(self.ledger.set_coordinates(ctx.job_id(), at)?)?;
        self.log_attempt(ctx.job_id(), JobStatus::Geocoding, 1, started, None);
        Ok(at)
    }

    async fn step_fetch_data(
        &self,
        ctx: &PipelineContext,
        at: Coordinates,
        cancel: &CancellationToken,
    ) -> Result<CourseData, StageError> {
        let started = Instant::now();
        let stage = JobStatus::FetchingData;

        let (elevation, imagery, layout, weather) = guarded(cancel, async {
            tokio::join!(
                self.engines.elevation.elevation_profile(at),
                self.engines.imagery.imagery(at),
                self.engines.layout.course_layout(at),
                self.engines.weather.weather(at),
            )
        })
        .await?;

        let elevation = match elevation {
            Ok(profile) => profile,
            Err(e) => {
                self.fallback(ctx, stage, "elevation provider", &e, FALLBACK_ELEVATION)?;
                flat_elevation()
            }
        };
        let imagery = match imagery {
            Ok(tile) => tile,
            Err(e) => {
                self.fallback(ctx, stage, "imagery provider", &e, FALLBACK_IMAGERY)?;
                default_imagery()
            }
        };
        let layout = match layout {
            Ok(layout) => layout,
            Err(e) => {
                self.fallback(ctx, stage, "layout provider", &e, FALLBACK_LAYOUT)?;
                synthetic_layout()
            }
        };
        let weather = match weather {
            Ok(report) => report,
            Err(e) => {
                self.fallback(ctx, stage, "weather provider", &e, FALLBACK_WEATHER)?;
                default_weather()
            }
        };

        self.log_attempt(ctx.job_id(), stage, 1, started, None);

        Ok(CourseData {
            name: ctx.job.subject_name.clone(),
            coordinates: at,
            elevation,
            imagery,
            layout,
            weather,
        })
    }

    /// Records a provider failure and the default that replaced it. A
    /// provider that was never configured is logged at info and raises no
    /// warning report.
    fn fallback(
        &self,
        ctx: &PipelineContext,
        stage: JobStatus,
        provider: &str,
        err: &EngineError,
        used: &str,
    ) -> Result<(), StageError> {
        let reason = format!("{} failed: {}", provider, err);
        if err.is_not_configured() {
            info!(stage = %stage, fallback = used, "{}", reason);
        } else {
            warn!(stage = %stage, fallback = used, "{}", reason);
            self.errors.record(
                ErrorReport::new(ReportKind::Warning, Severity::Medium, reason.clone())
                    .for_job(ctx.job_id())
                    .with_context("stage", stage.as_str())
                    .with_context("fallbackUsed", used),
            );
        }

        stopped_if_not_applied(
            self.ledger
                .add_fallback(ctx.job_id(), FallbackRecord::new(stage, reason, used))?,
        )
    }

    // ─── Production ─────────────────────────────────────────────────────────

    /// Calls a production engine under the retry policy. Any remaining
    /// error fails the stage.
    async fn produce<T, F, Fut>(
        &self,
        ctx: &PipelineContext,
        stage: JobStatus,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let max_attempts = self.settings.retry.max_attempts();
        let mut attempt = 1;

        loop {
            let started = Instant::now();
            match guarded(cancel, call()).await? {
                Ok(value) => {
                    self.log_attempt(ctx.job_id(), stage, attempt, started, None);
                    return Ok(value);
                }
                Err(err) => {
                    self.log_attempt(ctx.job_id(), stage, attempt, started, Some(err.to_string()));
                    if cancel.is_cancelled() {
                        return Err(StageError::Cancelled);
                    }
                    if attempt >= max_attempts {
                        return Err(StageError::Engine { stage, source: err });
                    }

                    let delay = self.settings.retry.delay_after(attempt);
                    warn!(
                        stage = %stage,
                        attempt,
                        error = %err,
                        "Engine call failed, retrying in {:?}",
                        delay
                    );
                    guarded(cancel, tokio::time::sleep(delay)).await?;
                    attempt += 1;
                }
            }
        }
    }

    fn log_attempt(&self, job_id: &JobId, stage: JobStatus, attempt: u32, started: Instant, error: Option<String>) {
        self.performance
            .log(PerformanceLog::new(job_id, stage, attempt, started.elapsed(), error));
    }

    // ─── Failure ────────────────────────────────────────────────────────────

    fn handle_failure(&self, job_id: &JobId, err: &StageError) -> PipelineOutcome {
        let message = err.to_string();
        let severity = match err {
            StageError::Store(_) => Severity::Critical,
            _ => Severity::High,
        };
        let mut report = ErrorReport::new(ReportKind::Error, severity, message.clone()).for_job(job_id);
        if let Some(stage) = err.stage() {
            report = report.with_context("stage", stage.as_str());
        }

        match self.ledger.fail(job_id, &message) {
            Ok(Transition::Applied) => {
                self.errors.record(report);
                PipelineOutcome::Failed
            }
            // cancelled while the failing stage was unwinding
            Ok(Transition::Stopped) => PipelineOutcome::Cancelled,
            Err(e) => {
                log::error!("Failed to record failure of job {}: {}", job_id, e);
                let mut report = report.with_context("storeError", e.to_string());
                report.severity = Severity::Critical;
                self.errors.record(report);
                PipelineOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl JobRunner for Pipeline {
    async fn run_job(&self, job: Job, cancel: CancellationToken) -> PipelineOutcome {
        self.run(job, cancel).await
    }
}
