//! Incremental parser for ffmpeg's `-progress` stream
//!
//! ffmpeg writes repeating blocks of `key=value` lines, each block closed by a
//! `progress=continue` line and the last one by `progress=end`. Bytes arrive
//! in arbitrary fragments, so only complete lines are ever interpreted and the
//! parser keeps nothing but the unterminated tail of the stream.

use tracing::trace;

/// Key reporting elapsed output time, in microseconds despite its name
pub const OUT_TIME_KEY: &str = "out_time_ms";
/// Key of the block terminator line
pub const PROGRESS_KEY: &str = "progress";
/// Terminator value marking the end of the stream
pub const PROGRESS_END: &str = "end";
/// Longest line kept while waiting for its newline
pub const DEFAULT_MAX_LINE_BYTES: usize = 4096;

/// Malformed input that the parser skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseAnomaly {
    /// `out_time_ms` carried something other than an integer (ffmpeg emits `N/A`)
    NonNumericTime(String),
    /// A line grew past the retention bound before its newline arrived
    OversizedLine(usize),
}

/// Turns raw progress bytes into completion fractions for one job
#[derive(Debug)]
pub struct ProgressParser {
    total_duration: f64,
    pending: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
    finished: bool,
    anomalies: usize,
}

impl ProgressParser {
    /// Create a parser measuring against `total_duration` seconds
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            pending: Vec::new(),
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            discarding: false,
            finished: false,
            anomalies: 0,
        }
    }

    /// Bound the unterminated tail kept between reads
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Whether the end sentinel has been seen
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of malformed fragments skipped so far
    pub fn anomalies(&self) -> usize {
        self.anomalies
    }

    /// Bytes currently retained while waiting for a newline
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Feed one chunk and return the fractions completed by it, in order.
    ///
    /// Only fractions strictly above zero are returned. The end sentinel
    /// yields exactly `1.0`, after which every further byte is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<f64> {
        let mut fractions = Vec::new();

        for &byte in chunk {
            if self.finished {
                break;
            }

            if byte == b'\n' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                let line = std::mem::take(&mut self.pending);
                if let Some(fraction) = self.interpret(&line) {
                    fractions.push(fraction);
                }
                continue;
            }

            if self.discarding {
                continue;
            }

            self.pending.push(byte);
            if self.pending.len() > self.max_line_bytes {
                self.record(ParseAnomaly::OversizedLine(self.pending.len()));
                self.pending.clear();
                self.discarding = true;
            }
        }

        fractions
    }

    /// Interpret a trailing line left without a newline when the stream closed
    pub fn finish(&mut self) -> Option<f64> {
        if self.finished || self.discarding || self.pending.is_empty() {
            self.pending.clear();
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        self.interpret(&line)
    }

    fn interpret(&mut self, raw: &[u8]) -> Option<f64> {
        let text = String::from_utf8_lossy(raw);
        let (key, value) = text.trim().split_once('=')?;

        match key.trim() {
            PROGRESS_KEY if value.trim() == PROGRESS_END => {
                self.finished = true;
                Some(1.0)
            }
            OUT_TIME_KEY => match value.trim().parse::<i64>() {
                Ok(micros) => {
                    let fraction = fraction_of(micros, self.total_duration);
                    (fraction > 0.0).then_some(fraction)
                }
                Err(_) => {
                    self.record(ParseAnomaly::NonNumericTime(value.trim().to_string()));
                    None
                }
            },
            _ => None,
        }
    }

    fn record(&mut self, anomaly: ParseAnomaly) {
        self.anomalies += 1;
        trace!(?anomaly, "Skipping malformed progress fragment");
    }
}

/// Elapsed microseconds over total seconds, clamped to `[0, 1]`
pub fn fraction_of(elapsed_micros: i64, total_seconds: f64) -> f64 {
    if !(total_seconds.is_finite() && total_seconds > 0.0) {
        return 0.0;
    }
    let seconds = elapsed_micros.max(0) as f64 / 1_000_000.0;
    (seconds / total_seconds).clamp(0.0, 1.0)
}
