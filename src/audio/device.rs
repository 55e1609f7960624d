//! Blocking chunk I/O seam between the engines and audio hardware
//!
//! Engines never talk to a sound server directly. They ask a backend for a
//! device at the start of each session and then block on it one chunk at a
//! time; that blocking is what paces both loops in real time.

use super::sample::Sample;
use crate::error::Result;

/// An open input stream delivering fixed-size chunks.
pub trait CaptureDevice<S: Sample>: Send {
    /// Block until one full chunk is available.
    fn read_chunk(&mut self) -> Result<Vec<S>>;
}

/// An open output stream accepting chunks.
pub trait PlaybackDevice<S: Sample>: Send {
    /// Block until the device has accepted `chunk`.
    fn write_chunk(&mut self, chunk: &[S]) -> Result<()>;

    /// Block until every accepted chunk has been rendered. Called once at the
    /// end of a pass that ran to completion; a cancelled pass just drops the
    /// device.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory for capture devices, shared between the controller and the loop.
pub trait CaptureBackend<S: Sample>: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Device-reported minimum buffer size, in samples. Every chunk read from
    /// an opened device has this length.
    fn chunk_samples(&self) -> usize;

    fn open_capture(&self) -> Result<Box<dyn CaptureDevice<S>>>;
}

/// Factory for playback devices.
pub trait PlaybackBackend<S: Sample>: Send + Sync {
    fn sample_rate(&self) -> u32;

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice<S>>>;
}
