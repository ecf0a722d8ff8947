//! Engine tests against a real progress socket and fake encoder processes
//!
//! The fake encoders are `sh -c '<script>'`, passed through the runner's
//! leading arguments, so no ffmpeg installation is needed.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, watch};

use webvids_cli::app::{Message, Orchestrator, RunOutcome, UiInput};
use webvids_cli::config::FailurePolicy;
use webvids_cli::domain::model::{
    FailureKind, JobId, JobRequest, JobSlot, PlannedJob, ProbeMetadata, TerminalStatus,
};
use webvids_cli::engine::{
    ChannelOutcome, ChannelSettings, JobEvent, JobHandle, JobRunner, ProgressServer,
    RunnerSettings, Transcoder,
};
use webvids_cli::error::{WebvidsError, WebvidsResult};
use webvids_cli::output::NoOpRenderer;
use webvids_cli::ports::ProbePort;

const TIMEOUT: Duration = Duration::from_secs(10);

fn socket_path(address: &str) -> PathBuf {
    PathBuf::from(address.trim_start_matches("unix://"))
}

fn fake_runner(script: &str) -> JobRunner {
    JobRunner::new(RunnerSettings {
        ffmpeg: PathBuf::from("sh"),
        leading_args: vec!["-c".to_string(), script.to_string(), "ffmpeg".to_string()],
        settle_delay: Duration::ZERO,
        channel_grace: Duration::from_millis(50),
        ..RunnerSettings::default()
    })
}

fn request_in(dir: &Path) -> JobRequest {
    JobRequest::new(
        dir.join("input.mov"),
        dir.join("optimized").join("input.mp4"),
        "libx265",
    )
    .with_arg("c:v", "libx265")
}

fn metadata() -> ProbeMetadata {
    ProbeMetadata::new(120.0, Some(1920), Some(1080))
}

async fn fractions(mut rx: mpsc::UnboundedReceiver<JobEvent>) -> Vec<f64> {
    let mut out = Vec::new();
    while let Some(event) = rx.recv().await {
        if let JobEvent::Progress(sample) = event {
            out.push(sample.fraction);
        }
    }
    out
}

async fn next_result(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> webvids_cli::JobResult {
    loop {
        let event = tokio::time::timeout(TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for a job result")
            .expect("event queue closed");
        if let JobEvent::Completed(result) = event {
            return result;
        }
    }
}

#[tokio::test]
async fn test_server_reports_half_then_complete() {
    let server = ProgressServer::bind(&ChannelSettings::default()).await.unwrap();
    let path = socket_path(server.address());
    let (tx, rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(JobId(1), 120.0, Arc::new(tx), stop_rx));

    let mut stream = UnixStream::connect(&path).await.unwrap();
    stream.write_all(b"frame=10\nout_time_ms=600").await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(b"00000\nprogress=continue\nprogress=end\n").await.unwrap();

    let outcome = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(outcome, ChannelOutcome::Completed);
    assert_eq!(fractions(rx).await, vec![0.5, 1.0]);
    assert!(!path.exists(), "socket file should be removed");
}

#[tokio::test]
async fn test_server_accepts_a_single_connection() {
    let server = ProgressServer::bind(&ChannelSettings::default()).await.unwrap();
    let path = socket_path(server.address());
    let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(JobId(2), 10.0, Arc::new(tx), stop_rx));

    let mut first = UnixStream::connect(&path).await.unwrap();
    first.write_all(b"out_time_ms=5000000\n").await.unwrap();
    let event = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(event, JobEvent::Progress(sample) if sample.fraction == 0.5));

    assert!(UnixStream::connect(&path).await.is_err());

    first.write_all(b"progress=end\n").await.unwrap();
    assert_eq!(task.await.unwrap(), ChannelOutcome::Completed);
}

#[tokio::test]
async fn test_server_disconnect_before_end() {
    let server = ProgressServer::bind(&ChannelSettings::default()).await.unwrap();
    let path = socket_path(server.address());
    let (tx, rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(JobId(3), 120.0, Arc::new(tx), stop_rx));

    let mut stream = UnixStream::connect(&path).await.unwrap();
    stream.write_all(b"out_time_ms=30000000\nout_time_ms=N/A\n").await.unwrap();
    drop(stream);

    assert_eq!(task.await.unwrap(), ChannelOutcome::Disconnected);
    assert_eq!(fractions(rx).await, vec![0.25]);
}

#[tokio::test]
async fn test_server_stop_without_connection() {
    let server = ProgressServer::bind(&ChannelSettings::default()).await.unwrap();
    let path = socket_path(server.address());
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(server.serve(JobId(4), 120.0, Arc::new(tx), stop_rx));

    stop_tx.send(true).unwrap();
    assert_eq!(task.await.unwrap(), ChannelOutcome::Stopped);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_runner_success_creates_output_dir() {
    let dir = TempDir::new().unwrap();
    let request = request_in(dir.path());
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(10));

    let result = fake_runner("exit 0")
        .run(JobId(10), &request, &metadata(), Arc::new(tx), cancel)
        .await;

    assert_eq!(result.job_id, JobId(10));
    assert_eq!(result.status, TerminalStatus::Succeeded);
    assert!(dir.path().join("optimized").is_dir());
}

#[tokio::test]
async fn test_runner_passes_progress_address_and_output() {
    let dir = TempDir::new().unwrap();
    let request = request_in(dir.path());
    let args_file = dir.path().join("args.txt");
    let script = format!("printf '%s\\n' \"$@\" > '{}'", args_file.display());
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(11));

    let result = fake_runner(&script)
        .run(
            JobId(11),
            &request,
            &ProbeMetadata::new(60.0, Some(3840), Some(2160)),
            Arc::new(tx),
            cancel,
        )
        .await;
    assert_eq!(result.status, TerminalStatus::Succeeded);

    let args = std::fs::read_to_string(&args_file).unwrap();
    let args: Vec<&str> = args.lines().collect();
    let progress = args.iter().position(|a| *a == "-progress").unwrap();
    assert!(args[progress + 1].starts_with("unix://"));
    assert!(args.contains(&"scale=1920:1080"));
    assert_eq!(
        args.last().copied(),
        Some(request.output_path.to_str().unwrap())
    );
}

#[tokio::test]
async fn test_runner_nonzero_exit_reports_stderr() {
    let dir = TempDir::new().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(12));

    let result = fake_runner("echo 'Unknown encoder' >&2; exit 3")
        .run(JobId(12), &request_in(dir.path()), &metadata(), Arc::new(tx), cancel)
        .await;

    match result.status {
        TerminalStatus::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Subprocess);
            assert!(failure.detail.contains("Unknown encoder"), "{}", failure.detail);
        }
        other => panic!("unexpected status {:?}", other),
    }
}

#[tokio::test]
async fn test_runner_missing_encoder() {
    let dir = TempDir::new().unwrap();
    let runner = JobRunner::new(RunnerSettings {
        ffmpeg: PathBuf::from("/nonexistent/bin/ffmpeg"),
        settle_delay: Duration::ZERO,
        ..RunnerSettings::default()
    });
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(13));

    let result = runner
        .run(JobId(13), &request_in(dir.path()), &metadata(), Arc::new(tx), cancel)
        .await;
    assert!(matches!(
        result.status,
        TerminalStatus::Failed(ref f) if f.kind == FailureKind::Spawn
    ));
}

#[tokio::test]
async fn test_runner_rejects_unknown_duration() {
    let dir = TempDir::new().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(14));
    let no_duration = ProbeMetadata::new(0.0, None, None);

    let result = fake_runner("exit 0")
        .run(JobId(14), &request_in(dir.path()), &no_duration, Arc::new(tx), cancel)
        .await;
    assert!(matches!(
        result.status,
        TerminalStatus::Failed(ref f) if f.kind == FailureKind::Probe
    ));

    // A preview job measures against its own length instead
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(15));
    let preview = request_in(dir.path()).with_preview(3.0);
    let result = fake_runner("exit 0")
        .run(JobId(15), &preview, &no_duration, Arc::new(tx), cancel)
        .await;
    assert_eq!(result.status, TerminalStatus::Succeeded);
}

#[tokio::test]
async fn test_runner_channel_bind_failure_skips_spawn() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("spawned");
    let mut settings = RunnerSettings {
        ffmpeg: PathBuf::from("sh"),
        leading_args: vec![
            "-c".to_string(),
            format!("touch '{}'", marker.display()),
            "ffmpeg".to_string(),
        ],
        settle_delay: Duration::ZERO,
        ..RunnerSettings::default()
    };
    settings.channel.socket_dir = Some(dir.path().join("no-such-dir"));
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(16));

    let result = JobRunner::new(settings)
        .run(JobId(16), &request_in(dir.path()), &metadata(), Arc::new(tx), cancel)
        .await;
    assert!(matches!(
        result.status,
        TerminalStatus::Failed(ref f) if f.kind == FailureKind::ChannelBind
    ));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_runner_cancel_kills_encoder() {
    let dir = TempDir::new().unwrap();
    let request = request_in(dir.path());
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (handle, cancel) = JobHandle::new(JobId(17));
    let runner = fake_runner("sleep 30");

    let task = tokio::spawn(async move {
        runner
            .run(JobId(17), &request, &metadata(), Arc::new(tx), cancel)
            .await
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.cancel();

    let result = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(result.status, TerminalStatus::Cancelled);

    // Cancelling a finished job is harmless
    handle.cancel();
}

fn runner_with_grace(script: &str, channel_grace: Duration) -> JobRunner {
    JobRunner::new(RunnerSettings {
        channel_grace,
        ..fake_runner(script).settings().clone()
    })
}

/// Whether a pid no longer names a live process (reaped, or a zombie awaiting reaping)
fn process_gone(pid: libc::pid_t) -> bool {
    // SAFETY: signal 0 only checks that the pid exists.
    if unsafe { libc::kill(pid, 0) } != 0 {
        return true;
    }
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .is_some_and(|rest| rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

#[tokio::test]
async fn test_runner_cancel_kills_encoder_process_group() {
    let dir = TempDir::new().unwrap();
    let pid_file = dir.path().join("helper.pid");
    let script = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
    let request = request_in(dir.path());
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (handle, cancel) = JobHandle::new(JobId(18));
    let runner = fake_runner(&script);

    let task = tokio::spawn(async move {
        runner
            .run(JobId(18), &request, &metadata(), Arc::new(tx), cancel)
            .await
    });

    let helper: libc::pid_t = tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Ok(text) = std::fs::read_to_string(&pid_file) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("encoder never started its helper");
    assert!(!process_gone(helper));

    handle.cancel();
    let result = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(result.status, TerminalStatus::Cancelled);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !process_gone(helper) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "helper process {} survived cancellation",
            helper
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_runner_does_not_wait_on_leftover_stderr_holders() {
    let dir = TempDir::new().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (_handle, cancel) = JobHandle::new(JobId(19));
    let runner = runner_with_grace("sleep 20 >/dev/null & exit 0", Duration::from_millis(100));

    let started = std::time::Instant::now();
    let result = runner
        .run(JobId(19), &request_in(dir.path()), &metadata(), Arc::new(tx), cancel)
        .await;
    assert_eq!(result.status, TerminalStatus::Succeeded);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_runner_cancel_after_encoder_exit() {
    let dir = TempDir::new().unwrap();
    let request = request_in(dir.path());
    let (tx, _rx) = mpsc::unbounded_channel::<JobEvent>();
    let (handle, cancel) = JobHandle::new(JobId(20));
    let runner = runner_with_grace("sleep 20 >/dev/null & exit 0", Duration::from_secs(15));

    let started = std::time::Instant::now();
    let task = tokio::spawn(async move {
        runner
            .run(JobId(20), &request, &metadata(), Arc::new(tx), cancel)
            .await
    });
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.cancel();

    let result = tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
    assert_eq!(result.status, TerminalStatus::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(5));
}

struct FakeProber {
    calls: AtomicUsize,
    delay: Duration,
    metadata: Option<ProbeMetadata>,
}

impl FakeProber {
    fn returning(metadata: Option<ProbeMetadata>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            metadata,
        })
    }
}

#[async_trait]
impl ProbePort for FakeProber {
    async fn probe(&self, path: &Path) -> WebvidsResult<ProbeMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.metadata.clone().ok_or_else(|| WebvidsError::ProbeError {
            message: format!("no streams in {}", path.display()),
        })
    }
}

#[tokio::test]
async fn test_transcoder_probes_each_input_once() {
    let dir = TempDir::new().unwrap();
    let prober = FakeProber::returning(Some(metadata()));
    let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();
    let transcoder = Transcoder::new(fake_runner("exit 0"), prober.clone(), Arc::new(tx));

    let first = transcoder.submit(request_in(dir.path()));
    let result = next_result(&mut rx).await;
    assert_eq!(result.job_id, first.id());
    assert_eq!(result.status, TerminalStatus::Succeeded);

    let second = transcoder.submit(request_in(dir.path()));
    assert_ne!(first.id(), second.id());
    let result = next_result(&mut rx).await;
    assert_eq!(result.job_id, second.id());

    assert_eq!(prober.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transcoder.probed_inputs(), 1);
}

#[tokio::test]
async fn test_transcoder_reports_probe_failure() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();
    let transcoder = Transcoder::new(
        fake_runner("exit 0"),
        FakeProber::returning(None),
        Arc::new(tx),
    );

    transcoder.submit(request_in(dir.path()));
    match next_result(&mut rx).await.status {
        TerminalStatus::Failed(failure) => {
            assert_eq!(failure.kind, FailureKind::Probe);
            assert!(failure.detail.contains("no streams"));
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert_eq!(transcoder.probed_inputs(), 0);
}

#[tokio::test]
async fn test_transcoder_cancel_during_probe() {
    let dir = TempDir::new().unwrap();
    let prober = Arc::new(FakeProber {
        calls: AtomicUsize::new(0),
        delay: Duration::from_secs(30),
        metadata: Some(metadata()),
    });
    let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();
    let transcoder = Transcoder::new(fake_runner("exit 0"), prober, Arc::new(tx));

    let handle = transcoder.submit(request_in(dir.path()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let result = next_result(&mut rx).await;
    assert_eq!(result.status, TerminalStatus::Cancelled);
}

#[tokio::test]
async fn test_orchestrated_run_sequences_jobs() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let transcoder = Transcoder::new(
        fake_runner("exit 0"),
        FakeProber::returning(Some(metadata())),
        Arc::new(tx.clone()),
    );
    let mut orchestrator = Orchestrator::new(transcoder, NoOpRenderer, FailurePolicy::Continue);

    let plan = vec![
        PlannedJob::new(JobSlot::new("hevc"), request_in(dir.path())),
        PlannedJob::new(
            JobSlot::new("av1"),
            JobRequest::new(
                dir.path().join("input.mov"),
                dir.path().join("optimized").join("input.webm"),
                "libsvtav1",
            ),
        ),
    ];
    tx.send(UiInput::FileSelected(dir.path().join("input.mov")).into())
        .unwrap();
    tx.send(UiInput::SettingsCompleted(plan).into()).unwrap();

    let outcome = tokio::time::timeout(TIMEOUT, orchestrator.run(&mut rx))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RunOutcome::Completed {
            succeeded: 2,
            failed: 0
        }
    );
}

#[tokio::test]
async fn test_orchestrated_run_cancel() {
    let dir = TempDir::new().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let transcoder = Transcoder::new(
        fake_runner("sleep 30"),
        FakeProber::returning(Some(metadata())),
        Arc::new(tx.clone()),
    );
    let mut orchestrator = Orchestrator::new(transcoder, NoOpRenderer, FailurePolicy::Continue);

    tx.send(UiInput::FileSelected(dir.path().join("input.mov")).into())
        .unwrap();
    tx.send(
        UiInput::SettingsCompleted(vec![PlannedJob::new(
            JobSlot::new("hevc"),
            request_in(dir.path()),
        )])
        .into(),
    )
    .unwrap();

    let canceller = tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = canceller.send(UiInput::Cancel.into());
    });

    let outcome = tokio::time::timeout(TIMEOUT, orchestrator.run(&mut rx))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);
}
