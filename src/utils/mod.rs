//! Common utilities and helpers

pub mod logging;

pub use logging::{init_logging, LogFormat};

/// Width of text progress bars, in cells
pub const BAR_WIDTH: usize = 30;

/// Fraction as a whole percentage, e.g. `42%`
pub fn format_percent(fraction: f64) -> String {
    format!("{:>3.0}%", fraction.clamp(0.0, 1.0) * 100.0)
}

/// Plain-text bar such as `[#######-------]`
pub fn progress_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64).floor() as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}
