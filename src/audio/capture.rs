//! Audio capture engine
//!
//! Runs a dedicated thread that blocks on the capture device one chunk at a
//! time and hands each chunk, with its write index, to a delivery callback.
//! The engine never touches the audio buffer itself.
//!
//! Every session gets its own run state and cancel flag. A stopped loop may
//! still be parked in `read_chunk`; it is left to exit on its own and reaped
//! later, so starting a new session never waits on the old device.

use super::device::CaptureBackend;
use super::run_state::{AtomicRunState, RunState};
use super::sample::Sample;
use log::{debug, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Capture loop manager
pub struct AudioCaptureEngine<S: Sample> {
    backend: Arc<dyn CaptureBackend<S>>,
    run_state: Arc<AtomicRunState>,
    cancel: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    retired: Vec<JoinHandle<()>>,
}

impl<S: Sample> AudioCaptureEngine<S> {
    pub fn new(backend: Arc<dyn CaptureBackend<S>>) -> Self {
        Self {
            backend,
            run_state: Arc::new(AtomicRunState::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            retired: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.backend.sample_rate()
    }

    /// Samples per captured chunk, as reported by the device.
    pub fn chunk_samples(&self) -> usize {
        self.backend.chunk_samples()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.load()
    }

    /// Check if a capture session is live
    pub fn is_running(&self) -> bool {
        self.run_state.is_active()
    }

    /// Start capturing. Chunks are delivered as `(chunk, index)` with the index
    /// counting up from `start_index`.
    ///
    /// Returns false, without side effects, if a session is already running or
    /// the device could not be opened.
    pub fn start<F>(&mut self, start_index: usize, mut deliver: F) -> bool
    where
        F: FnMut(Vec<S>, usize) + Send + 'static,
    {
        if self.run_state.is_active() {
            debug!("Capture already running, ignoring start");
            return false;
        }
        self.retire_previous_loop();

        let run_state = Arc::new(AtomicRunState::new());
        run_state.store(RunState::Starting);
        self.run_state = run_state.clone();

        let mut device = match self.backend.open_capture() {
            Ok(device) => device,
            Err(e) => {
                warn!("Capture not started: {}", e);
                run_state.store(RunState::Stopped);
                return false;
            }
        };

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = cancel.clone();
        run_state.store(RunState::Running);

        let spawned = thread::Builder::new()
            .name("tapeloop-capture".to_string())
            .spawn(move || {
                debug!("Capture loop started at chunk {}", start_index);
                let mut write_index = start_index;
                while !cancel.load(Ordering::SeqCst) {
                    match device.read_chunk() {
                        Ok(_) if cancel.load(Ordering::SeqCst) => {
                            trace!("Discarding chunk read after stop");
                            break;
                        }
                        Ok(chunk) => {
                            trace!("Captured chunk {} ({} samples)", write_index, chunk.len());
                            deliver(chunk, write_index);
                            write_index += 1;
                        }
                        Err(e) => {
                            warn!("Capture device failed: {}", e);
                            break;
                        }
                    }
                }
                drop(device);
                run_state.store(RunState::Stopped);
                debug!("Capture loop finished at chunk {}", write_index);
            });

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                true
            }
            Err(e) => {
                warn!("Failed to spawn capture thread: {}", e);
                self.run_state.store(RunState::Stopped);
                false
            }
        }
    }

    /// Ask the loop to stop. Does not wait: a delivery already under way
    /// completes, a chunk read after this call is discarded.
    pub fn stop(&mut self) {
        if self.run_state.transition(RunState::Running, RunState::Stopping) {
            self.cancel.store(true, Ordering::SeqCst);
            debug!("Capture stop requested");
        }
    }

    /// Block until the current session's thread has exited.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Park the previous session's thread and collect any that have exited.
    fn retire_previous_loop(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            self.retired.push(handle);
        }
        let (finished, parked): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|h| h.is_finished());
        for handle in finished {
            let _ = handle.join();
        }
        if !parked.is_empty() {
            debug!("{} stopped capture loop(s) still draining", parked.len());
        }
        self.retired = parked;
    }
}

impl<S: Sample> Drop for AudioCaptureEngine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
