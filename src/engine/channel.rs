//! Local progress endpoint that one ffmpeg process reports into
//!
//! The endpoint is bound before the encoder starts, accepts a single
//! connection and then stops listening. On unix it is a socket file in the
//! temp directory; elsewhere it is an ephemeral loopback TCP port.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::domain::model::{JobId, ProgressSample};
use crate::engine::progress::{ProgressParser, DEFAULT_MAX_LINE_BYTES};
use crate::engine::{cancelled, EventSink, JobEvent};
use crate::error::{WebvidsError, WebvidsResult};

/// Bytes requested per read from the encoder connection
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64;

/// How a progress channel ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// The end sentinel was received and reported
    Completed,
    /// The encoder disconnected (or never wrote) before the sentinel
    Disconnected,
    /// The runner stopped the server
    Stopped,
}

/// Channel tuning
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub read_chunk_size: usize,
    pub max_line_bytes: usize,
    /// Directory for socket files; the system temp dir when unset
    pub socket_dir: Option<PathBuf>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            socket_dir: None,
        }
    }
}

type ProgressStream = Box<dyn AsyncRead + Unpin + Send>;

enum Listener {
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        _file: SocketFile,
    },
    #[cfg(not(unix))]
    Tcp(tokio::net::TcpListener),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<ProgressStream> {
        match self {
            #[cfg(unix)]
            Listener::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Listener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

/// Removes the socket file when the listener goes away
#[cfg(unix)]
struct SocketFile(PathBuf);

#[cfg(unix)]
impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Could not remove progress socket {}: {}", self.0.display(), e);
            }
        }
    }
}

/// A bound, not yet connected, progress endpoint
pub struct ProgressServer {
    listener: Listener,
    address: String,
    read_chunk_size: usize,
    max_line_bytes: usize,
}

impl std::fmt::Debug for ProgressServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressServer")
            .field("address", &self.address)
            .finish()
    }
}

impl ProgressServer {
    /// Bind a fresh endpoint with a unique address
    #[cfg(unix)]
    pub async fn bind(settings: &ChannelSettings) -> WebvidsResult<Self> {
        let dir = settings
            .socket_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!("webvids-{}.sock", uuid::Uuid::new_v4().simple()));
        let address = format!("unix://{}", path.display());

        let listener =
            tokio::net::UnixListener::bind(&path).map_err(|e| WebvidsError::ChannelBindError {
                address: address.clone(),
                message: e.to_string(),
            })?;
        debug!(%address, "Progress channel listening");

        Ok(Self {
            listener: Listener::Unix {
                listener,
                _file: SocketFile(path),
            },
            address,
            read_chunk_size: settings.read_chunk_size.max(1),
            max_line_bytes: settings.max_line_bytes,
        })
    }

    /// Bind a fresh endpoint with a unique address
    #[cfg(not(unix))]
    pub async fn bind(settings: &ChannelSettings) -> WebvidsResult<Self> {
        let bind_error = |e: std::io::Error| WebvidsError::ChannelBindError {
            address: "tcp://127.0.0.1:0".to_string(),
            message: e.to_string(),
        };
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();
        let address = format!("tcp://127.0.0.1:{}", port);
        debug!(%address, "Progress channel listening");

        Ok(Self {
            listener: Listener::Tcp(listener),
            address,
            read_chunk_size: settings.read_chunk_size.max(1),
            max_line_bytes: settings.max_line_bytes,
        })
    }

    /// Address to hand to ffmpeg's `-progress`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Accept one connection and stream its samples into `sink`.
    ///
    /// The listener is closed as soon as the connection is accepted. Every
    /// sample is emitted before this returns, so a `Completed` event sent by
    /// the caller afterwards is always ordered behind them.
    pub async fn serve(
        self,
        job_id: JobId,
        total_duration: f64,
        sink: Arc<dyn EventSink>,
        mut stop: watch::Receiver<bool>,
    ) -> ChannelOutcome {
        let ProgressServer {
            listener,
            address,
            read_chunk_size,
            max_line_bytes,
        } = self;

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = cancelled(&mut stop) => {
                debug!(%job_id, %address, "Progress channel stopped before a connection");
                return ChannelOutcome::Stopped;
            }
        };
        drop(listener);

        let mut stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%job_id, %address, "Progress channel accept failed: {}", e);
                return ChannelOutcome::Disconnected;
            }
        };
        debug!(%job_id, "Encoder connected to progress channel");

        let mut parser = ProgressParser::new(total_duration).with_max_line_bytes(max_line_bytes);
        let mut buf = vec![0u8; read_chunk_size];

        loop {
            let read = tokio::select! {
                read = stream.read(&mut buf) => read,
                _ = cancelled(&mut stop) => return ChannelOutcome::Stopped,
            };

            match read {
                Ok(0) => {
                    if let Some(fraction) = parser.finish() {
                        emit(&*sink, job_id, fraction);
                    }
                    break;
                }
                Ok(n) => {
                    for fraction in parser.feed(&buf[..n]) {
                        emit(&*sink, job_id, fraction);
                    }
                    if parser.is_finished() {
                        break;
                    }
                }
                Err(e) => {
                    trace!(%job_id, "Progress channel read ended: {}", e);
                    break;
                }
            }
        }

        if parser.is_finished() {
            info!(%job_id, "Encoder reported completion");
            ChannelOutcome::Completed
        } else {
            ChannelOutcome::Disconnected
        }
    }
}

fn emit(sink: &dyn EventSink, job_id: JobId, fraction: f64) {
    trace!(%job_id, fraction, "Progress sample");
    if !sink.emit(JobEvent::Progress(ProgressSample { job_id, fraction })) {
        trace!(%job_id, "Progress sample dropped, no listener");
    }
}
