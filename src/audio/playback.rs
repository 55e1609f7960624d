//! Audio playback engine
//!
//! `play()` runs the DSP chain once over a snapshot of the buffer, opens the
//! playback device and streams the processed chunks from a cursor on a
//! dedicated thread. Progress and completion are published as
//! [`PlaybackEvent`]s tagged with the session they belong to.
//!
//! Each session owns its run state and cursor. A stopped loop still blocked
//! in a device write cannot touch the next session, so `play()` never waits
//! for it.

use super::buffer::ChunkedAudioBuffer;
use super::device::PlaybackBackend;
use super::dsp::{DspChain, DspSettings};
use super::run_state::{AtomicRunState, RunState};
use super::sample::Sample;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Notification published by the playback loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The chunk at `cursor` has been handed to the device. `epoch` is the
    /// seek count when the chunk was picked, so reports that predate a seek
    /// can be told apart.
    Progress {
        session: u64,
        cursor: usize,
        epoch: u64,
    },
    /// A non-looped pass reached the end of the buffer.
    Completed { session: u64 },
    /// The device failed mid-pass.
    Interrupted { session: u64 },
}

impl PlaybackEvent {
    pub fn session(&self) -> u64 {
        match *self {
            PlaybackEvent::Progress { session, .. }
            | PlaybackEvent::Completed { session }
            | PlaybackEvent::Interrupted { session } => session,
        }
    }
}

/// Playback loop manager
pub struct AudioPlaybackEngine<S: Sample> {
    backend: Arc<dyn PlaybackBackend<S>>,
    dsp: DspChain,
    progress_period_samples: usize,
    run_state: Arc<AtomicRunState>,
    cancel: Arc<AtomicBool>,
    cursor: Arc<AtomicUsize>,
    seek_epoch: Arc<AtomicU64>,
    looped: Arc<AtomicBool>,
    session: u64,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
    thread_handle: Option<JoinHandle<()>>,
    retired: Vec<JoinHandle<()>>,
}

impl<S: Sample> AudioPlaybackEngine<S> {
    /// `progress_period_samples` is the notification cadence: one `Progress`
    /// per that many samples written.
    pub fn new(backend: Arc<dyn PlaybackBackend<S>>, progress_period_samples: usize) -> Self {
        let dsp = DspChain::new(backend.sample_rate());
        let (events_tx, events_rx) = unbounded();
        Self {
            backend,
            dsp,
            progress_period_samples: progress_period_samples.max(1),
            run_state: Arc::new(AtomicRunState::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            cursor: Arc::new(AtomicUsize::new(0)),
            seek_epoch: Arc::new(AtomicU64::new(0)),
            looped: Arc::new(AtomicBool::new(false)),
            session: 0,
            events_tx,
            events_rx,
            thread_handle: None,
            retired: Vec::new(),
        }
    }

    /// Event stream for this engine. Meant to be taken once, by the owner.
    pub fn subscribe(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.dsp.sample_rate()
    }

    pub fn run_state(&self) -> RunState {
        self.run_state.load()
    }

    /// Check if a playback session is live
    pub fn is_playing(&self) -> bool {
        self.run_state.is_active()
    }

    pub fn cursor_position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Takes effect on the next loop iteration, or as the next start position.
    pub fn set_cursor_position(&self, position: usize) {
        // cursor first, so a chunk tagged with the new count was picked after it
        self.cursor.store(position, Ordering::SeqCst);
        self.seek_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of seeks so far; matches `epoch` on current progress reports.
    pub fn seek_epoch(&self) -> u64 {
        self.seek_epoch.load(Ordering::SeqCst)
    }

    /// Applies to the running pass from its next chunk on.
    pub fn set_looped(&self, looped: bool) {
        self.looped.store(looped, Ordering::SeqCst);
    }

    pub fn is_looped(&self) -> bool {
        self.looped.load(Ordering::SeqCst)
    }

    /// Start a playback pass over a processed copy of `buffer`.
    ///
    /// Returns the session id, or `None` if already playing, the buffer is
    /// empty or the device could not be opened.
    pub fn play(
        &mut self,
        buffer: &ChunkedAudioBuffer<S>,
        settings: &DspSettings,
        start_cursor: usize,
        looped: bool,
    ) -> Option<u64> {
        if buffer.is_empty() {
            debug!("Nothing to play, buffer is empty");
            return None;
        }

        if self.run_state.is_active() {
            debug!("Playback already running, ignoring play");
            return None;
        }
        self.retire_previous_loop();

        let run_state = Arc::new(AtomicRunState::new());
        run_state.store(RunState::Starting);
        self.run_state = run_state.clone();

        let processed = self.dsp.process(buffer, settings);

        let mut device = match self.backend.open_playback() {
            Ok(device) => device,
            Err(e) => {
                warn!("Playback not started: {}", e);
                run_state.store(RunState::Stopped);
                return None;
            }
        };

        self.session += 1;
        let session = self.session;
        self.cursor = Arc::new(AtomicUsize::new(start_cursor));
        self.looped.store(looped, Ordering::SeqCst);

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = cancel.clone();
        let cursor = self.cursor.clone();
        let seek_epoch = self.seek_epoch.clone();
        let looped = self.looped.clone();
        let events = self.events_tx.clone();
        let period = self.progress_period_samples;
        run_state.store(RunState::Running);

        let spawned = thread::Builder::new()
            .name("tapeloop-playback".to_string())
            .spawn(move || {
                debug!(
                    "Playback session {} started at chunk {} of {}",
                    session,
                    start_cursor,
                    processed.len()
                );
                let len = processed.len();
                let mut since_progress = 0usize;
                let mut interrupted = false;
                let mut reached_end = false;

                while !cancel.load(Ordering::SeqCst) {
                    let epoch = seek_epoch.load(Ordering::SeqCst);
                    let mut position = cursor.load(Ordering::SeqCst);
                    if position >= len {
                        if looped.load(Ordering::SeqCst) {
                            position = 0;
                            cursor.store(0, Ordering::SeqCst);
                        } else {
                            reached_end = true;
                            break;
                        }
                    }

                    let chunk = match processed.get(position) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            error!("Playback cursor escaped buffer: {}", e);
                            break;
                        }
                    };

                    if let Err(e) = device.write_chunk(chunk) {
                        warn!("Playback device failed: {}", e);
                        interrupted = true;
                        break;
                    }
                    trace!("Played chunk {}", position);

                    since_progress += chunk.len();
                    if since_progress >= period {
                        since_progress = 0;
                        let _ = events.send(PlaybackEvent::Progress {
                            session,
                            cursor: position,
                            epoch,
                        });
                    }

                    let mut next = position + 1;
                    if next >= len && looped.load(Ordering::SeqCst) {
                        next = 0;
                    }
                    // a seek that landed while the chunk was playing wins
                    let _ = cursor.compare_exchange(
                        position,
                        next,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    );
                }

                if reached_end && !cancel.load(Ordering::SeqCst) {
                    if let Err(e) = device.finish() {
                        warn!("Playback device failed to drain: {}", e);
                    }
                }
                drop(device);
                // stopped before publishing, so a listener may restart right away
                run_state.store(RunState::Stopped);
                if interrupted {
                    let _ = events.send(PlaybackEvent::Interrupted { session });
                } else if reached_end {
                    let _ = events.send(PlaybackEvent::Completed { session });
                }
                debug!("Playback session {} finished", session);
            });

        match spawned {
            Ok(handle) => {
                self.thread_handle = Some(handle);
                Some(session)
            }
            Err(e) => {
                warn!("Failed to spawn playback thread: {}", e);
                self.run_state.store(RunState::Stopped);
                None
            }
        }
    }

    /// Ask the loop to stop. Does not wait for the device write in flight.
    pub fn stop(&mut self) {
        if self.run_state.transition(RunState::Running, RunState::Stopping) {
            self.cancel.store(true, Ordering::SeqCst);
            debug!("Playback stop requested for session {}", self.session);
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
            debug!("{} stopped playback loop(s) still draining", parked.len());
        }
        self.retired = parked;
    }
}

impl<S: Sample> Drop for AudioPlaybackEngine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
