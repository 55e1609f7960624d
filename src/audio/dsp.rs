//! Playback signal chain: gain followed by a low-pass filter
//!
//! The chain runs once over a whole buffer snapshot before playback starts.
//! Filter history is created fresh for every [`DspChain::process`] call, so the
//! output for a given buffer and settings pair is always reproducible.

use super::buffer::ChunkedAudioBuffer;
use super::sample::Sample;
use serde::{Deserialize, Serialize};
use std::f32::consts::{SQRT_2, TAU};

/// User-facing processing settings. A new value fully replaces the old one.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspSettings {
    pub low_pass_enabled: bool,
    pub low_pass_cutoff_hz: f32,
    pub gain_enabled: bool,
    pub gain_db: f32,
}

impl Default for DspSettings {
    fn default() -> Self {
        Self {
            low_pass_enabled: false,
            low_pass_cutoff_hz: 4000.0,
            gain_enabled: false,
            gain_db: 0.0,
        }
    }
}

impl DspSettings {
    pub fn is_bypassed(&self) -> bool {
        !self.low_pass_enabled && !self.gain_enabled
    }
}

/// Stateless linear gain.
#[derive(Clone, Copy, Debug)]
pub struct Gain {
    scale: f32,
}

impl Gain {
    pub fn from_db(gain_db: f32) -> Self {
        Self {
            scale: 10f32.powf(gain_db / 20.0),
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    #[inline]
    pub fn render(&self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample *= self.scale;
        }
    }
}

/// Second-order Butterworth low-pass, built as a trapezoidal state-variable
/// filter.
///
/// `g` and `k` are the coefficients, `ic1eq`/`ic2eq` the two integrator
/// memories. Changing the cutoff rebuilds the coefficients and clears the
/// memories.
#[derive(Clone, Debug)]
pub struct LowPassFilter {
    ic1eq: f32,
    ic2eq: f32,
    g: f32,
    k: f32,
    cutoff_hz: f32,
    sample_rate: f32,
}

impl LowPassFilter {
    pub fn new(sample_rate: u32, cutoff_hz: f32) -> Self {
        let sample_rate = sample_rate.max(1) as f32;
        let mut filter = Self {
            ic1eq: 0.0,
            ic2eq: 0.0,
            g: 0.0,
            k: SQRT_2,
            cutoff_hz,
            sample_rate,
        };
        filter.set_cutoff(cutoff_hz);
        filter
    }

    pub fn cutoff_hz(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        // tan() blows up at Nyquist
        let nyquist_guard = (self.sample_rate * 0.49).max(1.0);
        // NaN leaves the filter wide open
        self.cutoff_hz = if cutoff_hz.is_nan() {
            nyquist_guard
        } else {
            cutoff_hz.clamp(1.0, nyquist_guard)
        };

        let wd = TAU * self.cutoff_hz;
        let wa = (2.0 * self.sample_rate) * (wd / (2.0 * self.sample_rate)).tan();
        self.g = wa / (2.0 * self.sample_rate);
        self.reset();
    }

    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }

    #[inline]
    pub fn next_sample(&mut self, sample: f32) -> f32 {
        let h = 1.0 / (1.0 + self.g * (self.g + self.k));
        let v3 = sample - self.ic2eq;
        let v1 = h * (self.ic1eq + self.g * v3);
        let v2 = self.ic2eq + self.g * v1;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        v2
    }

    pub fn render(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample(*sample);
        }
    }
}

/// Applies [`DspSettings`] to a buffer snapshot.
#[derive(Clone, Copy, Debug)]
pub struct DspChain {
    sample_rate: u32,
}

impl DspChain {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Produce a processed copy of `buffer`. The input is never touched.
    ///
    /// The filter runs continuously across chunk boundaries in buffer order.
    pub fn process<S: Sample>(
        &self,
        buffer: &ChunkedAudioBuffer<S>,
        settings: &DspSettings,
    ) -> ChunkedAudioBuffer<S> {
        if settings.is_bypassed() {
            return buffer.clone();
        }

        let gain = settings
            .gain_enabled
            .then(|| Gain::from_db(settings.gain_db));
        let mut low_pass = settings
            .low_pass_enabled
            .then(|| LowPassFilter::new(self.sample_rate, settings.low_pass_cutoff_hz));

        let mut scratch = Vec::with_capacity(buffer.chunk_samples());
        let chunks = buffer
            .iter()
            .map(|chunk| {
                scratch.clear();
                scratch.extend(chunk.iter().map(|s| s.to_f32()));

                if let Some(gain) = &gain {
                    gain.render(&mut scratch);
                }
                if let Some(filter) = low_pass.as_mut() {
                    filter.render(&mut scratch);
                }

                scratch.iter().map(|&v| S::from_f32(v)).collect()
            })
            .collect();

        ChunkedAudioBuffer::from_chunks(buffer.chunk_samples(), chunks)
    }
}
