//! Channel-backed devices
//!
//! The capture side reads chunks pushed into a crossbeam channel and the sink
//! forwards every written chunk into another one. Whoever holds the other end
//! of the channel decides the pace, which makes these devices handy for tests
//! and for feeding audio in programmatically.

use crate::audio::device::{CaptureBackend, CaptureDevice, PlaybackBackend, PlaybackDevice};
use crate::audio::sample::Sample;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};

/// Capture backend reading from a channel of chunks.
pub struct MemoryCapture<S> {
    source: Receiver<Vec<S>>,
    sample_rate: u32,
    chunk_samples: usize,
    available: bool,
}

impl<S: Sample> MemoryCapture<S> {
    pub fn new(source: Receiver<Vec<S>>, sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            source,
            sample_rate,
            chunk_samples,
            available: true,
        }
    }

    /// A backend whose device always fails to open.
    pub fn unavailable(sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            source: crossbeam_channel::never(),
            sample_rate,
            chunk_samples,
            available: false,
        }
    }
}

struct MemoryCaptureDevice<S> {
    source: Receiver<Vec<S>>,
}

impl<S: Sample> CaptureDevice<S> for MemoryCaptureDevice<S> {
    fn read_chunk(&mut self) -> Result<Vec<S>> {
        self.source
            .recv()
            .map_err(|_| Error::device("memory capture source closed"))
    }
}

impl<S: Sample> CaptureBackend<S> for MemoryCapture<S> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    fn open_capture(&self) -> Result<Box<dyn CaptureDevice<S>>> {
        if !self.available {
            return Err(Error::device("memory capture marked unavailable"));
        }
        Ok(Box::new(MemoryCaptureDevice {
            source: self.source.clone(),
        }))
    }
}

/// Playback backend forwarding every written chunk into a channel.
pub struct MemorySink<S> {
    sink: Option<Sender<Vec<S>>>,
    sample_rate: u32,
    fail_after: Option<usize>,
}

impl<S: Sample> MemorySink<S> {
    pub fn new(sink: Sender<Vec<S>>, sample_rate: u32) -> Self {
        Self {
            sink: Some(sink),
            sample_rate,
            fail_after: None,
        }
    }

    pub fn unavailable(sample_rate: u32) -> Self {
        Self {
            sink: None,
            sample_rate,
            fail_after: None,
        }
    }

    /// Each opened device accepts `writes` chunks, then every later write
    /// fails as if the device had been unplugged.
    pub fn failing_after(sink: Sender<Vec<S>>, sample_rate: u32, writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::new(sink, sample_rate)
        }
    }
}

struct MemorySinkDevice<S> {
    sink: Sender<Vec<S>>,
    remaining: Option<usize>,
}

impl<S: Sample> PlaybackDevice<S> for MemorySinkDevice<S> {
    fn write_chunk(&mut self, chunk: &[S]) -> Result<()> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Err(Error::device("memory sink went away"));
            }
            *remaining -= 1;
        }
        self.sink
            .send(chunk.to_vec())
            .map_err(|_| Error::device("memory sink closed"))
    }
}

impl<S: Sample> PlaybackBackend<S> for MemorySink<S> {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice<S>>> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| Error::device("memory sink marked unavailable"))?;
        Ok(Box::new(MemorySinkDevice {
            sink,
            remaining: self.fail_after,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_failing_sink_accepts_set_number_of_writes() {
        let (tx, rx) = unbounded();
        let backend = MemorySink::failing_after(tx, 8000, 2);

        let mut device = backend.open_playback().unwrap();
        assert!(device.write_chunk(&[0.1f32]).is_ok());
        assert!(device.write_chunk(&[0.2f32]).is_ok());
        assert!(device.write_chunk(&[0.3f32]).is_err());
        assert_eq!(rx.try_iter().count(), 2);

        // every device gets its own allowance
        let mut device = backend.open_playback().unwrap();
        assert!(device.write_chunk(&[0.4f32]).is_ok());
    }

    #[test]
    fn test_capture_reads_pushed_chunks() {
        let (tx, rx) = unbounded();
        let backend = MemoryCapture::new(rx, 8000, 2);
        tx.send(vec![1i16, 2]).unwrap();

        let mut device = backend.open_capture().unwrap();
        assert_eq!(device.read_chunk().unwrap(), vec![1, 2]);
        drop(tx);
        assert!(device.read_chunk().is_err());
    }
}
