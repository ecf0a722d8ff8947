// Domain rules - Output sizing policy

use serde::Serialize;

use crate::domain::model::ProbeMetadata;

/// Default bound for the short side of the output frame
pub const DEFAULT_MAX_DIMENSION: u32 = 1080;

/// Target frame size produced by the downscale rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleTarget {
    pub width: u32,
    pub height: u32,
}

impl ScaleTarget {
    /// Value for ffmpeg's `-vf`
    pub fn filter(&self) -> String {
        format!("scale={}:{}", self.width, self.height)
    }
}

/// Business rules for output resolution
///
/// The short side of the frame is bounded by `max_dimension`. Frames already
/// within the bound are never upscaled, the aspect ratio is kept, and both
/// output dimensions are even since 4:2:0 encoders reject odd sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalePolicy {
    pub max_dimension: u32,
}

impl Default for ScalePolicy {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl ScalePolicy {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Compute the downscale target, if one is needed
    pub fn target(&self, width: u32, height: u32) -> Option<ScaleTarget> {
        let max = self.max_dimension;
        if width == 0 || height == 0 || max == 0 {
            return None;
        }

        if width > height {
            // Landscape: bound the height
            if height <= max {
                return None;
            }
            let scaled = width as f64 * max as f64 / height as f64;
            Some(ScaleTarget {
                width: round_even(scaled),
                height: even_floor(max),
            })
        } else {
            // Portrait or square: bound the width
            if width <= max {
                return None;
            }
            let scaled = height as f64 * max as f64 / width as f64;
            Some(ScaleTarget {
                width: even_floor(max),
                height: round_even(scaled),
            })
        }
    }

    /// Downscale target for probed metadata, `None` when dimensions are unknown
    pub fn target_for(&self, metadata: &ProbeMetadata) -> Option<ScaleTarget> {
        metadata
            .dimensions()
            .and_then(|(width, height)| self.target(width, height))
    }
}

/// Round to the nearest even pixel count, never below 2
fn round_even(value: f64) -> u32 {
    let halves = (value / 2.0).round() as u32;
    halves.max(1) * 2
}

fn even_floor(value: u32) -> u32 {
    (value / 2).max(1) * 2
}
