//! Recorder state machine
//!
//! [`PlaybackController`] owns the buffer, both engines, the cursor, the loop
//! flag and the DSP settings. It is driven from a single thread: commands are
//! plain method calls that never fail, engine notifications are applied by
//! [`PlaybackController::process_events`], and observers read the outbound
//! [`ControllerEvent`] stream.
//!
//! ```text
//!            play()               start_recording()
//!   Idle ───────────────▶ Playing ──────────────────┐
//!    ▲ ◀─────────────────  │                        ▼
//!    │  pause()/completion                      Recording
//!    └──────────────────────────────────────────────┘
//!                     stop_recording()
//! ```

use crate::audio::amplitude::summarize;
use crate::audio::buffer::{ChunkedAudioBuffer, SharedBuffer};
use crate::audio::capture::AudioCaptureEngine;
use crate::audio::dsp::DspSettings;
use crate::audio::playback::{AudioPlaybackEngine, PlaybackEvent};
use crate::audio::sample::Sample;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, trace};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Current mode of the recorder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Recording,
}

/// Elapsed and total time, in whole seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PlaybackTimer {
    pub elapsed_secs: u64,
    pub total_secs: u64,
}

impl PlaybackTimer {
    /// Timer for `position` within `buffer`.
    pub fn at<S: Sample>(buffer: &ChunkedAudioBuffer<S>, position: usize, sample_rate: u32) -> Self {
        let total_secs = buffer.duration_secs(sample_rate);
        let elapsed_secs = if buffer.is_empty() {
            0
        } else {
            total_secs * position as u64 / buffer.len() as u64
        };
        Self {
            elapsed_secs,
            total_secs,
        }
    }
}

/// Display data for one captured chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkSummary {
    pub amplitude: f32,
    pub index: usize,
    /// False for the chunk that may trail a `stop_recording()`.
    pub recording: bool,
}

/// Observable changes published by the controller.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControllerEvent {
    StateChanged(PlaybackState),
    Position(usize),
    Timer(PlaybackTimer),
    Chunk(ChunkSummary),
}

pub struct PlaybackController<S: Sample> {
    sample_rate: u32,
    buffer: SharedBuffer<S>,
    capture: AudioCaptureEngine<S>,
    playback: AudioPlaybackEngine<S>,
    playback_events: Receiver<PlaybackEvent>,
    session: Option<u64>,
    state: PlaybackState,
    cursor: Arc<AtomicUsize>,
    recording_at: Arc<AtomicUsize>,
    recording: Arc<AtomicBool>,
    looped: bool,
    settings: DspSettings,
    events_tx: Sender<ControllerEvent>,
    events_rx: Receiver<ControllerEvent>,
}

impl<S: Sample> PlaybackController<S> {
    /// Wire the engines together around a fresh buffer sized for the capture
    /// device's chunks.
    pub fn new(capture: AudioCaptureEngine<S>, playback: AudioPlaybackEngine<S>) -> Self {
        let sample_rate = capture.sample_rate();
        let buffer = SharedBuffer::new(capture.chunk_samples());
        let playback_events = playback.subscribe();
        let (events_tx, events_rx) = unbounded();

        let controller = Self {
            sample_rate,
            buffer,
            capture,
            playback,
            playback_events,
            session: None,
            state: PlaybackState::Idle,
            cursor: Arc::new(AtomicUsize::new(0)),
            recording_at: Arc::new(AtomicUsize::new(0)),
            recording: Arc::new(AtomicBool::new(false)),
            looped: false,
            settings: DspSettings::default(),
            events_tx,
            events_rx,
        };
        controller.publish(ControllerEvent::StateChanged(PlaybackState::Idle));
        controller.publish_position();
        controller
    }

    /// Receiver for outbound events. Consumers are expected to keep draining
    /// it; events queue until read.
    pub fn events(&self) -> Receiver<ControllerEvent> {
        self.events_rx.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn cursor_position(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Write cursor of the current (or last) recording session.
    pub fn recording_position(&self) -> usize {
        self.recording_at.load(Ordering::SeqCst)
    }

    pub fn is_loop_enabled(&self) -> bool {
        self.looped
    }

    pub fn settings(&self) -> DspSettings {
        self.settings
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Read access to the recorded audio.
    pub fn buffer(&self) -> SharedBuffer<S> {
        self.buffer.clone()
    }

    pub fn timer(&self) -> PlaybackTimer {
        let position = if self.state == PlaybackState::Recording {
            self.recording_position()
        } else {
            self.cursor_position()
        };
        PlaybackTimer::at(&self.buffer.lock(), position, self.sample_rate)
    }

    /// Display amplitude of every stored chunk, in order.
    pub fn waveform(&self) -> Vec<f32> {
        self.buffer.lock().iter().map(summarize).collect()
    }

    /// Record from the cursor, overwriting what is there and appending past
    /// the end. Playback is paused first.
    pub fn start_recording(&mut self) {
        match self.state {
            PlaybackState::Recording => return,
            PlaybackState::Playing => self.pause(),
            PlaybackState::Idle => {}
        }

        let start = self.cursor_position();
        self.recording_at.store(start, Ordering::SeqCst);
        self.recording.store(true, Ordering::SeqCst);

        let buffer = self.buffer.clone();
        let events = self.events_tx.clone();
        let recording = self.recording.clone();
        let recording_at = self.recording_at.clone();
        let cursor = self.cursor.clone();
        let sample_rate = self.sample_rate;

        let started = self.capture.start(start, move |chunk, index| {
            let amplitude = summarize(&chunk);
            let is_recording = recording.load(Ordering::SeqCst);

            let timer = {
                let mut buffer = buffer.lock();
                if let Err(e) = buffer.write_at(index, chunk) {
                    error!("Dropping captured chunk: {}", e);
                    return;
                }
                recording_at.store(index + 1, Ordering::SeqCst);
                let position = if is_recording {
                    index + 1
                } else {
                    cursor.load(Ordering::SeqCst)
                };
                PlaybackTimer::at(&buffer, position, sample_rate)
            };

            trace!("Stored chunk {} (amplitude {:.3})", index, amplitude);
            let _ = events.send(ControllerEvent::Chunk(ChunkSummary {
                amplitude,
                index,
                recording: is_recording,
            }));
            let _ = events.send(ControllerEvent::Timer(timer));
        });

        if started {
            info!("Recording from chunk {}", start);
            self.update_state(PlaybackState::Recording);
        } else {
            self.recording.store(false, Ordering::SeqCst);
        }
    }

    pub fn stop_recording(&mut self) {
        if self.state != PlaybackState::Recording {
            return;
        }
        self.capture.stop();
        self.recording.store(false, Ordering::SeqCst);
        info!("Recording stopped at chunk {}", self.recording_position());
        self.update_state(PlaybackState::Idle);
        self.publish_position();
    }

    /// Play from the cursor with the current settings and loop flag.
    pub fn play(&mut self) {
        if self.state != PlaybackState::Idle {
            return;
        }
        self.process_events();

        let start = self.cursor_position();
        let session = {
            let buffer = self.buffer.lock();
            self.playback
                .play(&buffer, &self.settings, start, self.looped)
        };

        if let Some(session) = session {
            info!("Playing from chunk {} (session {})", start, session);
            self.session = Some(session);
            self.update_state(PlaybackState::Playing);
        }
    }

    /// Stop playback, keeping the cursor at the last reported position.
    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        // apply progress already reported, the pass may even have completed
        self.process_events();
        if self.state != PlaybackState::Playing {
            return;
        }

        self.playback.stop();
        self.session = None;
        debug!("Paused at chunk {}", self.cursor_position());
        self.update_state(PlaybackState::Idle);
    }

    pub fn rewind(&mut self) {
        self.set_cursor_position(0);
    }

    /// Move the cursor, clamped to the buffer length.
    pub fn set_cursor_position(&mut self, position: usize) {
        let clamped = position.min(self.buffer.len());
        self.cursor.store(clamped, Ordering::SeqCst);
        self.playback.set_cursor_position(clamped);
        self.publish_position();
    }

    pub fn set_looped(&mut self, looped: bool) {
        self.looped = looped;
        self.playback.set_looped(looped);
        self.publish(ControllerEvent::StateChanged(self.state));
    }

    /// Replace the DSP settings used by the next `play()`.
    pub fn set_settings(&mut self, settings: DspSettings) {
        debug!("DSP settings updated: {:?}", settings);
        self.settings = settings;
    }

    /// Apply pending playback engine notifications. Returns how many events
    /// were consumed, stale ones included.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.playback_events.try_recv() {
            handled += 1;
            if self.state != PlaybackState::Playing || self.session != Some(event.session()) {
                trace!("Ignoring stale playback event {:?}", event);
                continue;
            }

            match event {
                PlaybackEvent::Progress { cursor, epoch, .. } => {
                    if epoch != self.playback.seek_epoch() {
                        trace!("Ignoring progress from before the last seek");
                        continue;
                    }
                    self.cursor.store(cursor, Ordering::SeqCst);
                    self.publish_position();
                }
                PlaybackEvent::Completed { .. } => {
                    let end = self.buffer.len();
                    self.cursor.store(end, Ordering::SeqCst);
                    self.playback.set_cursor_position(end);
                    self.session = None;
                    debug!("Playback completed");
                    self.publish_position();
                    self.update_state(PlaybackState::Idle);
                }
                PlaybackEvent::Interrupted { .. } => {
                    self.session = None;
                    self.update_state(PlaybackState::Idle);
                }
            }
        }
        handled
    }

    /// Stop both engines. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.capture.stop();
        self.playback.stop();
        self.recording.store(false, Ordering::SeqCst);
        self.session = None;
        self.state = PlaybackState::Idle;
    }

    fn update_state(&mut self, state: PlaybackState) {
        self.state = state;
        self.publish(ControllerEvent::StateChanged(state));
    }

    fn publish_position(&self) {
        self.publish(ControllerEvent::Position(self.cursor_position()));
        self.publish(ControllerEvent::Timer(self.timer()));
    }

    fn publish(&self, event: ControllerEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl<S: Sample> Drop for PlaybackController<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::memory::{MemoryCapture, MemorySink};
    use crate::audio::run_state::RunState;
    use crossbeam_channel::bounded;
    use std::time::{Duration, Instant};

    const RATE: u32 = 1000;
    const CHUNK: usize = 100;
    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Rig {
        controller: PlaybackController<f32>,
        source: Sender<Vec<f32>>,
        played: Receiver<Vec<f32>>,
        events: Receiver<ControllerEvent>,
    }

    fn rig(sink_capacity: Option<usize>) -> Rig {
        let (source, source_rx) = unbounded();
        let (sink_tx, played) = match sink_capacity {
            Some(cap) => bounded(cap),
            None => unbounded(),
        };
        let capture = AudioCaptureEngine::new(Arc::new(MemoryCapture::new(source_rx, RATE, CHUNK)));
        let playback = AudioPlaybackEngine::new(Arc::new(MemorySink::new(sink_tx, RATE)), CHUNK);
        let controller = PlaybackController::new(capture, playback);
        let events = controller.events();
        Rig {
            controller,
            source,
            played,
            events,
        }
    }

    /// Store chunks directly, as if they had been recorded earlier.
    fn fill(rig: &Rig, values: &[f32]) {
        let buffer = rig.controller.buffer();
        for (index, &value) in values.iter().enumerate() {
            buffer.write_at(index, vec![value; CHUNK]).unwrap();
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !done() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn wait_for_idle(rig: &mut Rig) {
        wait_until(|| {
            rig.controller.process_events();
            rig.controller.state() == PlaybackState::Idle
        });
    }

    /// Keep a rendezvous sink drained until the playback loop has exited.
    fn drain_playback(rig: &mut Rig) {
        while rig.controller.playback.run_state() != RunState::Stopped {
            let _ = rig.played.recv_timeout(Duration::from_millis(10));
        }
        rig.controller.playback.join();
    }

    fn states(events: &Receiver<ControllerEvent>) -> Vec<PlaybackState> {
        events
            .try_iter()
            .filter_map(|e| match e {
                ControllerEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state_is_published() {
        let rig = rig(None);
        let initial: Vec<_> = rig.events.try_iter().collect();
        assert_eq!(
            initial,
            vec![
                ControllerEvent::StateChanged(PlaybackState::Idle),
                ControllerEvent::Position(0),
                ControllerEvent::Timer(PlaybackTimer::default()),
            ]
        );
    }

    #[test]
    fn test_recording_appends_chunks_and_publishes_amplitude() {
        let mut rig = rig(None);
        let _ = rig.events.try_iter().count();

        rig.controller.start_recording();
        assert_eq!(rig.controller.state(), PlaybackState::Recording);
        rig.source.send(vec![0.25; CHUNK]).unwrap();
        rig.source.send(vec![-0.04; CHUNK]).unwrap();

        let mut chunks = Vec::new();
        while chunks.len() < 2 {
            if let ControllerEvent::Chunk(c) = rig.events.recv_timeout(TIMEOUT).unwrap() {
                chunks.push(c);
            }
        }
        assert_eq!(chunks[0].index, 0);
        assert!((chunks[0].amplitude - 0.5).abs() < 1e-6);
        assert_eq!(chunks[1].index, 1);
        assert!((chunks[1].amplitude - 0.2).abs() < 1e-6);
        assert!(chunks.iter().all(|c| c.recording));

        rig.controller.stop_recording();
        assert_eq!(rig.controller.state(), PlaybackState::Idle);
        assert_eq!(rig.controller.buffer_len(), 2);
        assert_eq!(rig.controller.recording_position(), 2);
    }

    #[test]
    fn test_recording_overwrites_from_cursor() {
        let mut rig = rig(None);
        fill(&rig, &[0.1, 0.2, 0.3]);

        rig.controller.set_cursor_position(1);
        rig.controller.start_recording();
        rig.source.send(vec![0.9; CHUNK]).unwrap();
        wait_until(|| rig.controller.recording_position() >= 2);
        rig.controller.stop_recording();

        let buffer = rig.controller.buffer();
        assert_eq!(buffer.chunk(0).unwrap(), vec![0.1; CHUNK]);
        assert_eq!(buffer.chunk(1).unwrap(), vec![0.9; CHUNK]);
        assert_eq!(buffer.chunk(2).unwrap(), vec![0.3; CHUNK]);
        assert_eq!(rig.controller.buffer_len(), 3);
        assert_eq!(rig.controller.cursor_position(), 1);
    }

    #[test]
    fn test_unavailable_capture_stays_idle() {
        let (sink_tx, _played) = unbounded();
        let capture = AudioCaptureEngine::new(Arc::new(MemoryCapture::<f32>::unavailable(RATE, CHUNK)));
        let playback = AudioPlaybackEngine::new(Arc::new(MemorySink::new(sink_tx, RATE)), CHUNK);
        let mut controller = PlaybackController::new(capture, playback);

        controller.start_recording();
        assert_eq!(controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_play_to_completion_pins_cursor_at_end() {
        let mut rig = rig(None);
        fill(&rig, &[0.1, 0.2, 0.3]);
        let _ = rig.events.try_iter().count();

        rig.controller.set_cursor_position(1);
        rig.controller.play();
        assert_eq!(rig.controller.state(), PlaybackState::Playing);
        wait_for_idle(&mut rig);

        assert_eq!(rig.controller.cursor_position(), 3);
        let played: Vec<_> = rig.played.try_iter().map(|c| c[0]).collect();
        assert_eq!(played, vec![0.2, 0.3]);
        assert_eq!(
            states(&rig.events),
            vec![PlaybackState::Playing, PlaybackState::Idle]
        );
    }

    #[test]
    fn test_pause_keeps_last_reported_position() {
        let mut rig = rig(Some(0));
        fill(&rig, &[0.1, 0.2, 0.3]);
        rig.controller.set_looped(true);
        rig.controller.play();

        for _ in 0..4 {
            rig.played.recv_timeout(TIMEOUT).unwrap();
        }
        rig.controller.pause();
        assert_eq!(rig.controller.state(), PlaybackState::Idle);
        let paused_at = rig.controller.cursor_position();
        assert!(paused_at < 3);

        // late progress from the stopped pass must not move the cursor
        drain_playback(&mut rig);
        rig.controller.process_events();
        assert_eq!(rig.controller.cursor_position(), paused_at);
    }

    #[test]
    fn test_commands_outside_their_state_are_ignored() {
        let mut rig = rig(None);
        let _ = rig.events.try_iter().count();

        rig.controller.pause();
        rig.controller.stop_recording();
        rig.controller.play(); // empty buffer
        assert_eq!(rig.controller.state(), PlaybackState::Idle);
        assert!(states(&rig.events).is_empty());
    }

    #[test]
    fn test_play_twice_has_one_effect() {
        let mut rig = rig(Some(0));
        fill(&rig, &[0.1, 0.2]);
        let _ = rig.events.try_iter().count();

        rig.controller.set_looped(true);
        rig.controller.play();
        rig.controller.play();
        assert_eq!(
            states(&rig.events),
            vec![PlaybackState::Idle, PlaybackState::Playing]
        );

        rig.controller.pause();
        rig.controller.pause();
        drain_playback(&mut rig);
        assert_eq!(rig.controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_cursor_is_clamped_and_rewind_resets() {
        let mut rig = rig(None);
        fill(&rig, &[0.1, 0.2]);

        rig.controller.set_cursor_position(100);
        assert_eq!(rig.controller.cursor_position(), 2);

        let _ = rig.events.try_iter().count();
        rig.controller.rewind();
        assert_eq!(rig.controller.cursor_position(), 0);
        let published: Vec<_> = rig.events.try_iter().collect();
        assert_eq!(
            published,
            vec![
                ControllerEvent::Position(0),
                ControllerEvent::Timer(PlaybackTimer::default()),
            ]
        );
    }

    #[test]
    fn test_set_looped_republishes_state() {
        let mut rig = rig(None);
        let _ = rig.events.try_iter().count();

        rig.controller.set_looped(true);
        assert!(rig.controller.is_loop_enabled());
        assert_eq!(states(&rig.events), vec![PlaybackState::Idle]);
    }

    #[test]
    fn test_start_recording_while_playing_pauses_first() {
        let mut rig = rig(Some(0));
        fill(&rig, &[0.1, 0.2, 0.3]);
        rig.controller.set_looped(true);
        rig.controller.play();
        rig.played.recv_timeout(TIMEOUT).unwrap();

        rig.controller.start_recording();
        assert_eq!(rig.controller.state(), PlaybackState::Recording);
        assert!(!rig.controller.playback.is_playing());

        rig.controller.stop_recording();
        drain_playback(&mut rig);
    }

    #[test]
    fn test_timer_tracks_duration() {
        let mut rig = rig(None);
        // ten chunks of 100 samples at 1 kHz: one second
        fill(&rig, &[0.1; 10]);

        rig.controller.set_cursor_position(10);
        assert_eq!(
            rig.controller.timer(),
            PlaybackTimer {
                elapsed_secs: 1,
                total_secs: 1
            }
        );
        rig.controller.set_cursor_position(5);
        assert_eq!(rig.controller.timer().elapsed_secs, 0);
    }

    #[test]
    fn test_waveform_summarizes_each_chunk() {
        let rig = rig(None);
        fill(&rig, &[0.25, 0.04]);
        let waveform = rig.controller.waveform();
        assert_eq!(waveform.len(), 2);
        assert!((waveform[0] - 0.5).abs() < 1e-6);
        assert!((waveform[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_settings_replace_previous_value() {
        let mut rig = rig(None);
        let settings = DspSettings {
            gain_enabled: true,
            gain_db: -6.0,
            ..DspSettings::default()
        };
        rig.controller.set_settings(settings);
        assert_eq!(rig.controller.settings(), settings);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut rig = rig(None);
        rig.controller.start_recording();
        rig.controller.shutdown();
        rig.controller.shutdown();
        assert_eq!(rig.controller.state(), PlaybackState::Idle);
    }

    #[test]
    fn test_restart_recording_does_not_wait_for_parked_capture() {
        let Rig {
            mut controller,
            source,
            ..
        } = rig(None);

        // the first capture loop stays blocked on a source with nothing in it
        controller.start_recording();
        std::thread::sleep(Duration::from_millis(50));
        controller.stop_recording();

        let (tx, rx) = bounded(1);
        let worker = std::thread::spawn(move || {
            controller.start_recording();
            tx.send(controller.state()).unwrap();
            controller
        });
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), PlaybackState::Recording);
        let mut controller = worker.join().unwrap();

        // either loop may wake on the first chunk, only the live one keeps it
        source.send(vec![0.7; CHUNK]).unwrap();
        source.send(vec![0.7; CHUNK]).unwrap();
        wait_until(|| controller.recording_position() >= 1);
        controller.stop_recording();
        assert_eq!(controller.buffer().chunk(0).unwrap(), vec![0.7; CHUNK]);
    }

    #[test]
    fn test_device_failure_returns_to_idle() {
        let (_source, source_rx) = unbounded();
        let (sink_tx, played) = unbounded();
        let capture = AudioCaptureEngine::new(Arc::new(MemoryCapture::new(source_rx, RATE, CHUNK)));
        let playback = AudioPlaybackEngine::new(
            Arc::new(MemorySink::failing_after(sink_tx, RATE, 1)),
            CHUNK,
        );
        let mut controller = PlaybackController::new(capture, playback);
        let events = controller.events();
        for (index, value) in [0.1, 0.2, 0.3].into_iter().enumerate() {
            controller.buffer().write_at(index, vec![value; CHUNK]).unwrap();
        }

        controller.set_cursor_position(1);
        let _ = events.try_iter().count();
        controller.play();
        assert_eq!(controller.state(), PlaybackState::Playing);
        wait_until(|| {
            controller.process_events();
            controller.state() == PlaybackState::Idle
        });

        assert_eq!(
            states(&events),
            vec![PlaybackState::Playing, PlaybackState::Idle]
        );
        assert_eq!(played.try_iter().count(), 1);
        assert_eq!(controller.cursor_position(), 1);
    }

    #[test]
    fn test_seek_then_pause_keeps_seek_target() {
        let mut rig = rig(Some(0));
        fill(&rig, &[0.1, 0.2, 0.3, 0.4, 0.5]);
        rig.controller.play();

        rig.played.recv_timeout(TIMEOUT).unwrap();
        rig.played.recv_timeout(TIMEOUT).unwrap();
        rig.controller.set_cursor_position(3);
        // progress for chunks picked before the seek is still in flight
        std::thread::sleep(Duration::from_millis(20));
        rig.controller.pause();

        assert_eq!(rig.controller.state(), PlaybackState::Idle);
        assert_eq!(rig.controller.cursor_position(), 3);
        drain_playback(&mut rig);
    }
}
