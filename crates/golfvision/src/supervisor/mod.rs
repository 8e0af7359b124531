//! Supervision of native engine processes.
//!
//! Every process runs under a timeout and a per-stream output cap. Processes
//! started on behalf of a job are registered so they can be killed when the
//! job is cancelled; a pattern sweep (`pkill -f`) additionally catches strays
//! that were not started through this supervisor.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::job::JobId;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s", .timeout.as_secs_f64())]
    Timeout { program: String, timeout: Duration },

    #[error("'{program}' exited with {}: {stderr}", describe_exit(.code))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("'{program}' produced more than {limit} bytes of output")]
    OutputLimit { program: String, limit: usize },

    #[error("I/O error while supervising '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' was killed")]
    Killed { program: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// One process launch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    /// Cap applied to stdout and to stderr independently.
    pub max_output_bytes: usize,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            max_output_bytes: 10 * 1024 * 1024,
            working_dir: None,
        }
    }

    pub fn max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SupervisorSettings {
    /// Run `pkill -f` sweeps in addition to killing registered children.
    pub orphan_sweep: bool,
    /// Command-line fragments that identify engine processes for `kill_all`.
    pub signatures: Vec<String>,
}

struct Running {
    job_id: Option<JobId>,
    program: String,
    pid: Option<u32>,
    kill: CancellationToken,
}

struct Inner {
    settings: SupervisorSettings,
    running: Mutex<HashMap<u64, Running>>,
    next_id: AtomicU64,
}

/// Removes a process from the registry when its run ends, however it ends.
struct Registration {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.inner.running().remove(&self.id);
    }
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, HashMap<u64, Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Supervisor registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

enum Outcome {
    Finished(Result<(ExitStatus, Vec<u8>, Vec<u8>), SupervisorError>),
    TimedOut,
    Killed,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                running: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Runs a process to completion.
    ///
    /// Fails on spawn errors, timeout, non-zero exit, output overflow, or
    /// when killed through [`kill_all_for`](Self::kill_all_for) /
    /// [`kill_all`](Self::kill_all). The child never outlives this call.
    pub async fn run(
        &self,
        job_id: Option<&JobId>,
        invocation: &Invocation,
    ) -> Result<ProcessOutput, SupervisorError> {
        let span = info_span!(
            "subprocess",
            program = %invocation.program,
            job_id = job_id.map(|j| j.as_str()).unwrap_or("-"),
        );
        self.run_inner(job_id, invocation).instrument(span).await
    }

    async fn run_inner(
        &self,
        job_id: Option<&JobId>,
        invocation: &Invocation,
    ) -> Result<ProcessOutput, SupervisorError> {
        let program = invocation.program.clone();
        let started = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::Spawn {
            program: program.clone(),
            source: e,
        })?;
        debug!(pid = ?child.id(), args = ?invocation.args, "spawned");

        let kill = CancellationToken::new();
        let _registration = self.register(job_id, &program, child.id(), kill.clone());

        let outcome = tokio::select! {
            biased;
            _ = kill.cancelled() => Outcome::Killed,
            _ = tokio::time::sleep(invocation.timeout) => Outcome::TimedOut,
            res = collect(&mut child, invocation.max_output_bytes, &program) => Outcome::Finished(res),
        };

        let result = match outcome {
            Outcome::Finished(Ok((status, stdout, stderr))) => {
                if status.success() {
                    return Ok(ProcessOutput {
                        stdout,
                        stderr,
                        elapsed: started.elapsed(),
                    });
                }
                Err(SupervisorError::NonZeroExit {
                    program: program.clone(),
                    code: status.code(),
                    stderr: tail(&stderr, 2048),
                })
            }
            Outcome::Finished(Err(e)) => Err(e),
            Outcome::TimedOut => Err(SupervisorError::Timeout {
                program: program.clone(),
                timeout: invocation.timeout,
            }),
            Outcome::Killed => Err(SupervisorError::Killed {
                program: program.clone(),
            }),
        };

        if let Err(e) = child.kill().await {
            // Already exited is the common case here.
            debug!("kill after failure: {}", e);
        }
        if let Err(ref e) = result {
            warn!("{}", e);
        }
        result
    }

    fn register(
        &self,
        job_id: Option<&JobId>,
        program: &str,
        pid: Option<u32>,
        kill: CancellationToken,
    ) -> Registration {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.running().insert(
            id,
            Running {
                job_id: job_id.cloned(),
                program: program.to_string(),
                pid,
                kill,
            },
        );
        Registration {
            inner: Arc::clone(&self.inner),
            id,
        }
    }

    /// Kills every process belonging to `job_id`. Best-effort: failures are
    /// logged, never returned. Returns how many registered processes were
    /// signalled.
    pub fn kill_all_for(&self, job_id: &JobId) -> usize {
        let mut signalled = 0;
        for running in self.inner.running().values() {
            if running.job_id.as_ref() == Some(job_id) {
                log::info!(
                    "Killing {} (pid {:?}) for job {}",
                    running.program,
                    running.pid,
                    job_id
                );
                running.kill.cancel();
                signalled += 1;
            }
        }
        if self.inner.settings.orphan_sweep {
            pattern_kill(job_id.to_string());
        }
        signalled
    }

    /// Kills every supervised process and sweeps for known engine signatures.
    pub fn kill_all(&self) -> usize {
        let mut signalled = 0;
        for running in self.inner.running().values() {
            running.kill.cancel();
            signalled += 1;
        }
        if self.inner.settings.orphan_sweep {
            for signature in &self.inner.settings.signatures {
                pattern_kill(signature.clone());
            }
        }
        if signalled > 0 {
            log::info!("Killed {} supervised processes", signalled);
        }
        signalled
    }

    pub fn running_count(&self) -> usize {
        self.inner.running().len()
    }

    pub fn running_for(&self, job_id: &JobId) -> usize {
        self.inner
            .running()
            .values()
            .filter(|r| r.job_id.as_ref() == Some(job_id))
            .count()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(SupervisorSettings::default())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

async fn collect(
    child: &mut Child,
    limit: usize,
    program: &str,
) -> Result<(ExitStatus, Vec<u8>, Vec<u8>), SupervisorError> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::try_join!(
        read_capped(stdout, limit, program),
        read_capped(stderr, limit, program)
    )?;
    let status = child.wait().await.map_err(|e| SupervisorError::Io {
        program: program.to_string(),
        source: e,
    })?;
    Ok((status, stdout, stderr))
}

async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
    program: &str,
) -> Result<Vec<u8>, SupervisorError> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| SupervisorError::Io {
                program: program.to_string(),
                source: e,
            })?;
        if n == 0 {
            return Ok(buf);
        }
        if buf.len() + n > limit {
            return Err(SupervisorError::OutputLimit {
                program: program.to_string(),
                limit,
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn tail(bytes: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    match text.char_indices().rev().nth(max.saturating_sub(1)) {
        Some((idx, _)) => text[idx..].to_string(),
        None => text.to_string(),
    }
}

/// Escapes regex metacharacters for `pkill -f`.
fn escape_pattern(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn pattern_kill(pattern: String) {
    let pattern = escape_pattern(&pattern);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                match Command::new("pkill")
                    .args(["-TERM", "-f", &pattern])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                {
                    Ok(status) => debug!(pattern = %pattern, code = ?status.code(), "pkill sweep"),
                    Err(e) => log::warn!("pkill sweep for '{}' failed: {}", pattern, e),
                }
            });
        }
        Err(_) => {
            if let Err(e) = std::process::Command::new("pkill")
                .args(["-TERM", "-f", &pattern])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                log::warn!("pkill sweep for '{}' failed: {}", pattern, e);
            }
        }
    }
}
