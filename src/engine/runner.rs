//! Runs one ffmpeg encode and reports its terminal status

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::domain::model::{
    JobFailure, JobId, JobRequest, JobResult, JobState, ProbeMetadata,
};
use crate::domain::rules::{ScalePolicy, ScaleTarget};
use crate::engine::channel::{ChannelOutcome, ChannelSettings, ProgressServer};
use crate::engine::{cancelled, EventSink};
use crate::error::WebvidsError;

/// Amount of encoder stderr kept for failure reports
const STDERR_TAIL_BYTES: usize = 2048;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Encoder executable
    pub ffmpeg: PathBuf,
    /// Arguments placed before the generated ones (wrappers such as `nice`)
    pub leading_args: Vec<String>,
    pub scale: ScalePolicy,
    pub channel: ChannelSettings,
    /// Pause after a successful exit so the last bar update stays visible
    pub settle_delay: Duration,
    /// How long to wait for the progress channel to drain after exit
    pub channel_grace: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            leading_args: Vec::new(),
            scale: ScalePolicy::default(),
            channel: ChannelSettings::default(),
            settle_delay: Duration::from_millis(500),
            channel_grace: Duration::from_millis(500),
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            ffmpeg: config.tools.ffmpeg.clone(),
            leading_args: config.tools.ffmpeg_args.clone(),
            scale: ScalePolicy::new(config.output.max_dimension),
            channel: ChannelSettings {
                read_chunk_size: config.progress.read_chunk_size,
                max_line_bytes: config.progress.max_line_bytes,
                socket_dir: config.progress.socket_dir.clone(),
            },
            settle_delay: Duration::from_millis(config.progress.settle_delay_ms),
            channel_grace: Duration::from_millis(config.progress.channel_grace_ms),
        }
    }
}

/// Bookkeeping for one job while the runner owns it
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: JobId,
    pub request: JobRequest,
    pub channel_address: Option<String>,
    pub state: JobState,
}

impl JobRun {
    fn new(id: JobId, request: &JobRequest) -> Self {
        Self {
            id,
            request: request.clone(),
            channel_address: None,
            state: JobState::Pending,
        }
    }

    fn finish(&mut self, result: JobResult) -> JobResult {
        self.state = result.state();
        debug!(job_id = %self.id, state = ?self.state, "Job finished");
        result
    }

    fn fail(&mut self, err: &WebvidsError) -> JobResult {
        warn!(job_id = %self.id, "Job failed: {}", err);
        self.finish(JobResult::failed(self.id, JobFailure::from(err)))
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Launches encoder processes wired to a progress channel
#[derive(Debug, Clone, Default)]
pub struct JobRunner {
    settings: Arc<RunnerSettings>,
}

impl JobRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Downscale needed for this request, unless it brings its own `vf`
    pub fn scale_for(&self, request: &JobRequest, metadata: &ProbeMetadata) -> Option<ScaleTarget> {
        if request.encoder_args.contains_key("vf") {
            return None;
        }
        self.settings.scale.target_for(metadata)
    }

    /// Encoder arguments, excluding the configured leading arguments
    pub fn build_args(
        &self,
        request: &JobRequest,
        progress_address: &str,
        scale: Option<ScaleTarget>,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-nostdin",
            "-nostats",
            "-loglevel",
            "error",
            "-progress",
            progress_address,
            "-y",
            "-i",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(request.input_path.clone().into_os_string());

        for (key, value) in &request.encoder_args {
            args.push(OsString::from(format!("-{}", key)));
            if !value.is_empty() {
                args.push(OsString::from(value));
            }
        }

        if let Some(target) = scale {
            args.push(OsString::from("-vf"));
            args.push(OsString::from(target.filter()));
        }

        args.push(request.output_path.clone().into_os_string());
        args
    }

    /// Run one job to completion, failure or cancellation.
    ///
    /// The progress endpoint is bound before the encoder is spawned; a bind
    /// failure fails the job without ever starting the encoder. The encoder's
    /// exit status decides the outcome, the progress channel is advisory.
    pub async fn run(
        &self,
        job_id: JobId,
        request: &JobRequest,
        metadata: &ProbeMetadata,
        sink: Arc<dyn EventSink>,
        mut cancel: watch::Receiver<bool>,
    ) -> JobResult {
        let started = Instant::now();
        let mut run = JobRun::new(job_id, request);
        info!(
            %job_id,
            codec = %request.codec_id,
            input = %request.input_path.display(),
            output = %request.output_path.display(),
            "Starting encode"
        );

        if let Err(e) = ensure_output_dir(&request.output_path) {
            return run.fail(&e);
        }

        let total_duration = match metadata.total_duration(request.preview_seconds) {
            Ok(duration) => duration,
            Err(e) => return run.fail(&e),
        };

        let scale = self.scale_for(request, metadata);
        if let Some(target) = scale {
            debug!(%job_id, width = target.width, height = target.height, "Downscaling output");
        }

        let server = match ProgressServer::bind(&self.settings.channel).await {
            Ok(server) => server,
            Err(e) => return run.fail(&e),
        };
        run.channel_address = Some(server.address().to_string());

        let mut command = Command::new(&self.settings.ffmpeg);
        command
            .args(&self.settings.leading_args)
            .args(self.build_args(request, server.address(), scale))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let (stop_tx, stop_rx) = watch::channel(false);
        let server_task = tokio::spawn(server.serve(job_id, total_duration, sink, stop_rx));

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = stop_tx.send(true);
                let _ = server_task.await;
                return run.fail(&WebvidsError::SpawnError {
                    program: self.settings.ffmpeg.display().to_string(),
                    message: e.to_string(),
                });
            }
        };
        run.state = JobState::Running;
        let pid = child.id();
        debug!(%job_id, ?pid, "Encoder started");

        let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(read_tail(stderr)));

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = cancelled(&mut cancel) => Waited::Cancelled,
        };

        let status = match waited {
            Waited::Cancelled => {
                info!(%job_id, "Cancelling encode");
                terminate(&mut child).await;
                let _ = stop_tx.send(true);
                let _ = server_task.await;
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return run.finish(JobResult::cancelled(job_id));
            }
            Waited::Exited(Ok(status)) => status,
            Waited::Exited(Err(e)) => {
                let _ = stop_tx.send(true);
                let _ = server_task.await;
                return run.fail(&WebvidsError::IoError(e));
            }
        };

        // Leftovers of the encoder's group may outlive it; cancel still applies.
        let concluded = tokio::select! {
            concluded = self.conclude(job_id, status, server_task, &stop_tx, stderr_task, pid) => concluded,
            _ = cancelled(&mut cancel) => {
                info!(%job_id, "Cancelling after encoder exit");
                kill_group(pid);
                let _ = stop_tx.send(true);
                return run.finish(JobResult::cancelled(job_id));
            }
        };

        match concluded {
            Ok(()) => {
                info!(%job_id, elapsed = ?started.elapsed(), "Encode finished");
                run.finish(JobResult::succeeded(job_id))
            }
            Err(e) => run.fail(&e),
        }
    }

    /// Collect the channel outcome and stderr of an exited encoder
    async fn conclude(
        &self,
        job_id: JobId,
        status: ExitStatus,
        mut server_task: JoinHandle<ChannelOutcome>,
        stop_tx: &watch::Sender<bool>,
        stderr_task: Option<JoinHandle<String>>,
        pid: Option<u32>,
    ) -> Result<(), WebvidsError> {
        let grace = self.settings.channel_grace;
        let outcome = match tokio::time::timeout(grace, &mut server_task).await {
            Ok(joined) => joined.unwrap_or(ChannelOutcome::Disconnected),
            Err(_) => {
                let _ = stop_tx.send(true);
                server_task.await.unwrap_or(ChannelOutcome::Stopped)
            }
        };

        let stderr_tail = match stderr_task {
            Some(task) => drain_stderr(job_id, task, grace, pid).await,
            None => String::new(),
        };

        if !status.success() {
            return Err(WebvidsError::SubprocessFailure {
                status: status.to_string(),
                stderr: stderr_tail,
            });
        }

        if outcome != ChannelOutcome::Completed {
            warn!(%job_id, ?outcome, "Encoder exited cleanly without reporting completion");
        }

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
        Ok(())
    }
}

/// Create the directory the output file lands in
fn ensure_output_dir(output_path: &Path) -> Result<(), WebvidsError> {
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            debug!("Created output directory {}", parent.display());
        }
    }
    Ok(())
}

/// Forcibly stop the encoder and everything in its process group
async fn terminate(child: &mut Child) {
    if !kill_group(child.id()) {
        let _ = child.start_kill();
    }
    if let Err(e) = child.wait().await {
        debug!("Failed to reap cancelled encoder: {}", e);
    }
}

/// SIGKILL the process group led by `pid`; false when nothing was signalled
#[cfg(unix)]
fn kill_group(pid: Option<u32>) -> bool {
    let Some(pid) = pid else {
        return false;
    };
    // SAFETY: killpg only signals the group the encoder leads; no memory is shared.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!("killpg({}) failed: {}", pid, std::io::Error::last_os_error());
    }
    rc == 0
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) -> bool {
    false
}

/// Wait for the stderr reader, killing whatever in the encoder's group still holds the pipe
async fn drain_stderr(
    job_id: JobId,
    mut task: JoinHandle<String>,
    grace: Duration,
    pid: Option<u32>,
) -> String {
    if let Ok(joined) = tokio::time::timeout(grace, &mut task).await {
        return joined.unwrap_or_default();
    }
    debug!(%job_id, "Encoder stderr still open after exit, killing its process group");
    kill_group(pid);
    match tokio::time::timeout(grace, &mut task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// Read a stream to its end, keeping only the last `STDERR_TAIL_BYTES`
async fn read_tail<R: AsyncRead + Unpin>(mut stream: R) -> String {
    let mut tail = Vec::with_capacity(STDERR_TAIL_BYTES * 2);
    let mut chunk = [0u8; 1024];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL_BYTES * 2 {
                    tail.drain(..tail.len() - STDERR_TAIL_BYTES);
                }
            }
        }
    }
    tail_lossy(&tail, STDERR_TAIL_BYTES)
}

fn tail_lossy(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}
