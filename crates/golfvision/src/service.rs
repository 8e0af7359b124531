//! The assembled service: store, publisher, recorders, pipeline and
//! scheduler wired from one [`Config`].

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::broadcast::{JobEvent, StatusPublisher, Subscription};
use crate::config::loader::MAX_SWEEP_INTERVAL_HOURS;
use crate::config::Config;
use crate::db::Database;
use crate::engines::{
    BlenderModelBuilder, BlenderRenderer, ElevationSource, Engines, FfmpegEncoder, Gazetteer,
    Geocoder, GeocoderChain, GttsSynthesizer, LocalDelivery, NominatimGeocoder, OpenMeteoClient,
    Unconfigured, WeatherSource,
};
use crate::error::{Result, SchedulerError};
use crate::job::{Job, JobId, SubmitRequest};
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::recorder::{
    Dashboard, ErrorQuery, ErrorRecorder, ErrorReport, ErrorStats, PerformanceRecorder,
    RetentionSweeper,
};
use crate::scheduler::{JobCounts, JobLedger, Scheduler};
use crate::store::{JobStore, MemoryJobStore, SqliteJobStore};
use crate::supervisor::{Supervisor, SupervisorSettings};

pub struct GolfVision {
    config: Config,
    scheduler: Scheduler,
    ledger: Arc<JobLedger>,
    errors: Arc<ErrorRecorder>,
    performance: Arc<PerformanceRecorder>,
    supervisor: Supervisor,
    sweeper: RetentionSweeper,
}

/// Builds the production adapters described by `config`.
pub fn engines_from_config(config: &Config, supervisor: &Supervisor) -> Result<Engines> {
    let enrichment = &config.enrichment;
    let timeout = Duration::from_secs(enrichment.request_timeout_secs);

    let mut geocoders: Vec<Arc<dyn Geocoder>> = vec![Arc::new(Gazetteer::new())];
    let elevation: Arc<dyn ElevationSource>;
    let weather: Arc<dyn WeatherSource>;
    if enrichment.enabled {
        geocoders.push(Arc::new(NominatimGeocoder::new(
            &enrichment.nominatim_url,
            timeout,
        )?));
        let meteo = Arc::new(OpenMeteoClient::new(&enrichment.open_meteo_url, timeout)?);
        elevation = meteo.clone();
        weather = meteo;
    } else {
        elevation = Arc::new(Unconfigured::new("elevation provider"));
        weather = Arc::new(Unconfigured::new("weather provider"));
    }

    let commands = &config.engines;
    Ok(Engines {
        geocoder: Arc::new(GeocoderChain::new(geocoders)),
        elevation,
        imagery: Arc::new(Unconfigured::new("imagery provider")),
        layout: Arc::new(Unconfigured::new("course layout provider")),
        weather,
        model_builder: Arc::new(BlenderModelBuilder::new(
            supervisor.clone(),
            commands.model.clone(),
        )),
        renderer: Arc::new(BlenderRenderer::new(
            supervisor.clone(),
            commands.render.clone(),
        )),
        speech: Arc::new(GttsSynthesizer::new(
            supervisor.clone(),
            commands.speech.clone(),
        )),
        encoder: Arc::new(FfmpegEncoder::new(
            supervisor.clone(),
            commands.encode.clone(),
            commands.thumbnail.clone(),
            commands.probe.clone(),
        )),
        deliverer: Arc::new(LocalDelivery::new(
            config.output_directory.clone(),
            &config.base_url,
        )),
    })
}

pub fn supervisor_from_config(config: &Config) -> Supervisor {
    Supervisor::new(SupervisorSettings {
        orphan_sweep: config.supervisor.orphan_sweep,
        signatures: vec![config.temp_directory.to_string_lossy().into_owned()],
    })
}

impl GolfVision {
    /// Wires the service with the configured production engines. Must be
    /// called inside a Tokio runtime.
    pub fn from_config(config: Config) -> Result<Self> {
        let supervisor = supervisor_from_config(&config);
        let engines = engines_from_config(&config, &supervisor)?;
        Self::assemble(config, engines, supervisor)
    }

    /// Same as [`from_config`](Self::from_config) with caller-provided
    /// engines.
    pub fn with_engines(config: Config, engines: Engines) -> Result<Self> {
        let supervisor = supervisor_from_config(&config);
        Self::assemble(config, engines, supervisor)
    }

    fn assemble(config: Config, engines: Engines, supervisor: Supervisor) -> Result<Self> {
        let store: Arc<dyn JobStore> = match &config.database {
            Some(path) => {
                log::info!("Job records stored in {}", path.display());
                Arc::new(SqliteJobStore::new(Database::open(path)?))
            }
            None => Arc::new(MemoryJobStore::new()),
        };

        let publisher = StatusPublisher::new(config.publisher.channel_capacity);
        let ledger = Arc::new(JobLedger::new(store, publisher));
        let recovered = ledger.recover_interrupted()?;
        if recovered > 0 {
            log::warn!("Marked {} interrupted job(s) as failed", recovered);
        }

        let errors = Arc::new(match &config.errors.persist_path {
            Some(path) => ErrorRecorder::with_persistence(path.clone())?,
            None => ErrorRecorder::new(),
        });
        let performance = Arc::new(PerformanceRecorder::new());

        let pipeline = Pipeline::new(
            engines,
            Arc::clone(&ledger),
            Arc::clone(&errors),
            Arc::clone(&performance),
            PipelineSettings::from_config(&config),
        );
        let scheduler = Scheduler::new(
            Arc::clone(&ledger),
            Arc::new(pipeline),
            supervisor.clone(),
            Arc::clone(&errors),
        )?;

        let handle = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        // Configs built in code skip validation; keep the timer in range.
        let sweep_hours = config
            .errors
            .sweep_interval_hours
            .min(MAX_SWEEP_INTERVAL_HOURS);
        let sweeper = RetentionSweeper::new(
            Arc::clone(&errors),
            Duration::from_secs(sweep_hours * 3600),
            config.errors.retention_days,
        );
        sweeper.start(&handle);

        log::info!(
            "GolfVision ready (outputs in {}, workspaces in {})",
            config.output_directory.display(),
            config.temp_directory.display()
        );

        Ok(Self {
            config,
            scheduler,
            ledger,
            errors,
            performance,
            supervisor,
            sweeper,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    // ─── Jobs ───

    pub fn submit(&self, request: SubmitRequest) -> Result<Job> {
        self.scheduler.submit(request)
    }

    pub fn cancel(&self, id: &JobId) -> Result<bool> {
        Ok(self.scheduler.cancel(id)?)
    }

    pub fn cancel_all_active(&self) -> Result<Vec<JobId>> {
        Ok(self.scheduler.cancel_all_active()?)
    }

    pub fn get(&self, id: &JobId) -> Result<Option<Job>> {
        Ok(self.scheduler.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<Job>> {
        Ok(self.scheduler.list()?)
    }

    pub fn delete(&self, id: &JobId) -> Result<bool> {
        Ok(self.scheduler.delete(id)?)
    }

    pub fn counts(&self) -> Result<JobCounts> {
        Ok(self.scheduler.counts()?)
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await
    }

    // ─── Status events ───

    pub fn subscribe(&self, id: &JobId) -> Subscription {
        self.ledger.publisher().subscribe(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.ledger.publisher().unsubscribe(subscription)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<JobEvent> {
        self.ledger.publisher().subscribe_all()
    }

    // ─── Error log and performance ───

    pub fn errors(&self) -> &Arc<ErrorRecorder> {
        &self.errors
    }

    pub fn query_errors(&self, query: &ErrorQuery) -> Vec<ErrorReport> {
        self.errors.query(query)
    }

    pub fn resolve_error(&self, id: &str, resolved_by: &str, notes: Option<&str>) -> bool {
        self.errors.resolve(id, resolved_by, notes)
    }

    pub fn error_stats(&self) -> ErrorStats {
        self.errors.stats()
    }

    pub fn performance(&self) -> &Arc<PerformanceRecorder> {
        &self.performance
    }

    pub fn dashboard(&self, window: Option<chrono::Duration>) -> Dashboard {
        self.performance.dashboard(window)
    }

    /// Cancels active work, kills engine processes and stops the retention
    /// sweep.
    pub fn shutdown(&self) -> Result<()> {
        self.sweeper.stop();
        self.scheduler.shutdown()?;
        Ok(())
    }
}
