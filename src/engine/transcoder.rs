//! Job submission service handed to the orchestrator

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info_span, Instrument};

use crate::config::AppConfig;
use crate::domain::model::{JobId, JobRequest, JobResult};
use crate::engine::runner::{JobRunner, RunnerSettings};
use crate::engine::{cancelled, EventSink, JobEvent};
use crate::ports::{JobSubmitter, ProbePort};
use crate::probe::{FfprobeInspector, ProbeCache};

/// Owner's handle on a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: Arc<watch::Sender<bool>>,
}

impl JobHandle {
    /// Create a handle and the receiver the job task watches
    pub fn new(id: JobId) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                id,
                cancel: Arc::new(tx),
            },
            rx,
        )
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Ask the job to stop. A no-op once the job has finished.
    pub fn cancel(&self) {
        if self.cancel.send(true).is_err() {
            debug!(job_id = %self.id, "Cancel ignored, job already finished");
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        *self.cancel.borrow()
    }
}

struct Inner {
    runner: JobRunner,
    prober: Arc<dyn ProbePort>,
    cache: ProbeCache,
    sink: Arc<dyn EventSink>,
    next_id: AtomicU64,
}

/// Runs submitted jobs in background tasks and reports their events.
///
/// Each job emits zero or more `JobEvent::Progress` followed by exactly one
/// `JobEvent::Completed`. Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct Transcoder {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("runner", &self.inner.runner)
            .field("cached_probes", &self.inner.cache.len())
            .finish()
    }
}

impl Transcoder {
    pub fn new(runner: JobRunner, prober: Arc<dyn ProbePort>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                prober,
                cache: ProbeCache::new(),
                sink,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Transcoder using ffmpeg and ffprobe as configured
    pub fn from_config(config: &AppConfig, sink: impl EventSink) -> Self {
        Self::new(
            JobRunner::new(RunnerSettings::from_config(config)),
            Arc::new(FfprobeInspector::from_config(config)),
            Arc::new(sink),
        )
    }

    /// Number of inputs probed so far
    pub fn probed_inputs(&self) -> usize {
        self.inner.cache.len()
    }

    /// Start a job in the background and return its handle immediately
    pub fn submit(&self, request: JobRequest) -> JobHandle {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (handle, cancel) = JobHandle::new(id);
        let inner = Arc::clone(&self.inner);
        let span = info_span!("job", job_id = %id, codec = %request.codec_id);

        tokio::spawn(
            async move {
                let result = inner.execute(id, request, cancel).await;
                if !inner.sink.emit(JobEvent::Completed(result)) {
                    debug!("Job result dropped, no listener");
                }
            }
            .instrument(span),
        );

        handle
    }
}

impl Inner {
    async fn execute(
        &self,
        id: JobId,
        request: JobRequest,
        mut cancel: watch::Receiver<bool>,
    ) -> JobResult {
        let probed = tokio::select! {
            probed = self.cache.get_or_probe(&*self.prober, &request.input_path) => probed,
            _ = cancelled(&mut cancel) => return JobResult::cancelled(id),
        };

        let metadata = match probed {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Probe failed: {}", e);
                return JobResult::failed(id, &e);
            }
        };

        self.runner
            .run(id, &request, &metadata, Arc::clone(&self.sink), cancel)
            .await
    }
}

impl JobSubmitter for Transcoder {
    fn submit(&mut self, request: JobRequest) -> JobHandle {
        Transcoder::submit(self, request)
    }
}
