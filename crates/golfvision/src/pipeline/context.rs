use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::engines::EngineContext;
use crate::job::{Job, JobId};

use super::storyboard::effective_seed;

/// Per-run state shared by every stage. Stage results are passed along as
/// plain values by the runner.
pub struct PipelineContext {
    pub job: Job,
    pub engine: EngineContext,
    pub started: Instant,
}

impl PipelineContext {
    pub fn new(job: Job, temp_directory: &Path) -> Self {
        let engine = EngineContext {
            job_id: job.id.clone(),
            workspace: temp_directory.join(job.id.as_str()),
            seed: effective_seed(&job),
        };
        Self {
            job,
            engine,
            started: Instant::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.engine.workspace
    }

    pub fn render_time_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
