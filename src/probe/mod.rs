//! Media file inspection via ffprobe

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::debug;

use crate::domain::model::ProbeMetadata;
use crate::error::{WebvidsError, WebvidsResult};
use crate::ports::ProbePort;

pub mod inspector;

pub use inspector::FfprobeInspector;

/// Subset of `ffprobe -print_format json -show_format -show_streams`
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    /// Seconds as a decimal string
    #[serde(default)]
    duration: Option<String>,
}

/// Parse ffprobe's JSON report.
///
/// A missing or `N/A` duration is reported as zero; callers decide whether
/// that is usable. Dimensions come from the first stream reporting both.
pub fn parse_probe_output(json: &str) -> WebvidsResult<ProbeMetadata> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| WebvidsError::probe(format!("unexpected ffprobe output: {}", e)))?;

    let duration_seconds = match output.format.and_then(|f| f.duration) {
        None => 0.0,
        Some(raw) if raw.trim() == "N/A" => 0.0,
        Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
            WebvidsError::probe(format!("unparseable duration {:?}", raw))
        })?,
    };

    let dimensions = output.streams.iter().find_map(|stream| match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    });

    Ok(ProbeMetadata::new(
        duration_seconds,
        dimensions.map(|(w, _)| w),
        dimensions.map(|(_, h)| h),
    ))
}

/// Memoizes probe results per input path for the lifetime of a run
#[derive(Debug, Default)]
pub struct ProbeCache {
    entries: Mutex<HashMap<PathBuf, ProbeMetadata>>,
}

impl ProbeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<ProbeMetadata> {
        let key = cache_key(path);
        self.entries.lock().ok()?.get(&key).cloned()
    }

    pub fn insert(&self, path: &Path, metadata: ProbeMetadata) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(cache_key(path), metadata);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached metadata, probing on the first request for a path.
    ///
    /// Failures are not cached. The lock is never held across the probe, so
    /// two concurrent first requests may both probe; the results are equal.
    pub async fn get_or_probe(
        &self,
        prober: &dyn ProbePort,
        path: &Path,
    ) -> WebvidsResult<ProbeMetadata> {
        if let Some(metadata) = self.get(path) {
            debug!("Probe cache hit for {}", path.display());
            return Ok(metadata);
        }

        let metadata = prober.probe(path).await?;
        self.insert(path, metadata.clone());
        Ok(metadata)
    }
}

fn cache_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
