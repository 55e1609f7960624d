//! Per-chunk display amplitude

use super::sample::Sample;

/// Peak magnitude of `chunk`, square-root compressed for display.
///
/// Returns 0.0 for an empty chunk.
pub fn summarize<S: Sample>(chunk: &[S]) -> f32 {
    let peak = chunk
        .iter()
        .map(|s| s.to_f32().abs())
        .fold(0.0f32, f32::max);
    peak.sqrt()
}
