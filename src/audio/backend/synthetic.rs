//! Hardware-free devices paced by the wall clock
//!
//! `ToneCapture` produces a sine tone and `NullSink` discards audio. Both sleep
//! one chunk duration per call so the engines see the same timing they would
//! against a real device.

use crate::audio::device::{CaptureBackend, CaptureDevice, PlaybackBackend, PlaybackDevice};
use crate::audio::sample::Sample;
use crate::error::Result;
use std::f32::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

fn chunk_period(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples as f64 / sample_rate.max(1) as f64)
}

/// Keeps a stream of calls aligned to real time without drifting.
struct Pacer {
    next_deadline: Option<Instant>,
}

impl Pacer {
    fn new() -> Self {
        Self {
            next_deadline: None,
        }
    }

    fn wait(&mut self, period: Duration) {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now) + period;
        if deadline > now {
            thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now));
    }
}

/// Sine tone generator standing in for a microphone.
#[derive(Clone, Debug)]
pub struct ToneCapture {
    pub sample_rate: u32,
    pub chunk_samples: usize,
    pub frequency_hz: f32,
    pub amplitude: f32,
}

impl ToneCapture {
    pub fn new(sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            sample_rate,
            chunk_samples,
            frequency_hz: 440.0,
            amplitude: 0.25,
        }
    }
}

struct ToneDevice {
    config: ToneCapture,
    phase: f32,
    pacer: Pacer,
}

impl<S: Sample> CaptureDevice<S> for ToneDevice {
    fn read_chunk(&mut self) -> Result<Vec<S>> {
        self.pacer.wait(chunk_period(
            self.config.chunk_samples,
            self.config.sample_rate,
        ));

        let step = self.config.frequency_hz / self.config.sample_rate.max(1) as f32;
        let chunk = (0..self.config.chunk_samples)
            .map(|_| {
                let value = (TAU * self.phase).sin() * self.config.amplitude;
                self.phase = (self.phase + step).fract();
                S::from_f32(value)
            })
            .collect();
        Ok(chunk)
    }
}

impl<S: Sample> CaptureBackend<S> for ToneCapture {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    fn open_capture(&self) -> Result<Box<dyn CaptureDevice<S>>> {
        Ok(Box::new(ToneDevice {
            config: self.clone(),
            phase: 0.0,
            pacer: Pacer::new(),
        }))
    }
}

/// Output that accepts audio at real-time speed and discards it.
#[derive(Clone, Copy, Debug)]
pub struct NullSink {
    pub sample_rate: u32,
}

impl NullSink {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

struct NullDevice {
    sample_rate: u32,
    pacer: Pacer,
}

impl<S: Sample> PlaybackDevice<S> for NullDevice {
    fn write_chunk(&mut self, chunk: &[S]) -> Result<()> {
        self.pacer.wait(chunk_period(chunk.len(), self.sample_rate));
        Ok(())
    }
}

impl<S: Sample> PlaybackBackend<S> for NullSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice<S>>> {
        Ok(Box::new(NullDevice {
            sample_rate: self.sample_rate,
            pacer: Pacer::new(),
        }))
    }
}
