//! PCM sample representations
//!
//! Buffers and engines are generic over [`Sample`]; DSP math always happens in
//! normalized `f32`, so switching representation only changes scale.

use std::fmt::Debug;

/// A single PCM value.
pub trait Sample: Copy + Default + PartialEq + Debug + Send + Sync + 'static {
    /// Convert to a normalized float in `-1.0..=1.0`.
    fn to_f32(self) -> f32;

    /// Convert from a normalized float, saturating where the type has a
    /// fixed range.
    fn from_f32(value: f32) -> Self;
}

impl Sample for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        value
    }
}

const I16_SCALE: f32 = 32768.0;

impl Sample for i16 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32 / I16_SCALE
    }

    #[inline]
    fn from_f32(value: f32) -> Self {
        (value * I16_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16
    }
}
