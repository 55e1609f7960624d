//! Audio capture, storage and playback
//!
//! This module provides:
//! - A chunked in-memory recording buffer
//! - Capture and playback engines running on dedicated threads
//! - A gain + low-pass processing chain applied at playback time
//! - Device backends (PipeWire, a synthetic tone source, in-memory channels)

pub mod amplitude;
pub mod backend;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod dsp;
pub mod playback;
pub mod run_state;
pub mod sample;

pub use buffer::{ChunkedAudioBuffer, SharedBuffer};
pub use capture::AudioCaptureEngine;
pub use device::{CaptureBackend, CaptureDevice, PlaybackBackend, PlaybackDevice};
pub use dsp::{DspChain, DspSettings};
pub use playback::{AudioPlaybackEngine, PlaybackEvent};
pub use run_state::RunState;
pub use sample::Sample;

/// Default capture and playback rate, in Hz.
pub const SAMPLE_RATE: u32 = 44_100;
