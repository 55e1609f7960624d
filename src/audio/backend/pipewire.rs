//! PipeWire capture and playback streams
//!
//! PipeWire drives audio through a realtime `process` callback on its own main
//! loop. Each opened device runs that main loop on a dedicated thread and
//! bridges it to blocking chunk I/O with bounded crossbeam channels: the
//! capture callback slices incoming audio into fixed-size chunks, and the
//! playback callback pulls chunks the engine has written, emitting silence on
//! underrun.

use crate::audio::device::{CaptureBackend, CaptureDevice, PlaybackBackend, PlaybackDevice};
use crate::audio::sample::Sample;
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use log::{debug, trace, warn};
use pipewire as pw;
use pw::spa;
use pw::spa::param::format::{MediaSubtype, MediaType};
use pw::spa::param::format_utils;
use pw::spa::pod::Pod;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const APP_NAME: &str = "Tapeloop Recorder";
const SAMPLE_BYTES: usize = std::mem::size_of::<f32>();

/// Chunks queued between the realtime callback and the engine loop.
const CAPTURE_QUEUE: usize = 8;
const PLAYBACK_QUEUE: usize = 2;

/// Grace period on top of the queued audio when draining playback.
const DRAIN_SLACK: Duration = Duration::from_secs(1);

enum StreamCommand {
    Stop,
}

/// PipeWire backend for both directions.
#[derive(Clone, Debug)]
pub struct PipeWireBackend {
    sample_rate: u32,
    chunk_samples: usize,
}

impl PipeWireBackend {
    pub fn new(sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            sample_rate,
            chunk_samples,
        }
    }
}

/// Owns the thread running a stream's main loop.
struct StreamThread {
    sender: Option<pw::channel::Sender<StreamCommand>>,
    handle: Option<JoinHandle<()>>,
    /// Disconnects when the thread exits.
    exited: Receiver<()>,
}

impl StreamThread {
    /// Spawn `run` on its own thread and wait until the stream is connected.
    fn spawn<F>(name: &str, run: F) -> Result<Self>
    where
        F: FnOnce(pw::channel::Receiver<StreamCommand>, Sender<Result<()>>) -> std::result::Result<(), String>
            + Send
            + 'static,
    {
        let (sender, receiver) = pw::channel::channel::<StreamCommand>();
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

        let (exit_guard, exited) = bounded::<()>(0);

        let error_tx = ready_tx.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit_guard = exit_guard;
                if let Err(e) = run(receiver, ready_tx) {
                    warn!("PipeWire stream ended: {}", e);
                    let _ = error_tx.try_send(Err(Error::device(e)));
                }
            })?;

        let mut stream = Self {
            sender: Some(sender),
            handle: Some(handle),
            exited,
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(stream),
            Ok(Err(e)) => {
                stream.stop();
                Err(e)
            }
            Err(_) => {
                stream.stop();
                Err(Error::device("PipeWire thread exited before connecting"))
            }
        }
    }

    /// Wait for the main loop to quit by itself, stopping it after `limit`.
    fn wait(&mut self, limit: Duration) {
        match self.exited.recv_timeout(limit) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("PipeWire stream still running after {:?}, stopping it", limit);
                self.stop();
            }
            _ => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
        }
    }

    fn stop(&mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(StreamCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Serialized EnumFormat pod requesting mono F32LE at `sample_rate`.
fn format_params(sample_rate: u32) -> std::result::Result<Vec<u8>, String> {
    let mut audio_info = spa::param::audio::AudioInfoRaw::new();
    audio_info.set_format(spa::param::audio::AudioFormat::F32LE);
    audio_info.set_rate(sample_rate);
    audio_info.set_channels(1);

    let obj = spa::pod::Object {
        type_: spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    Ok(spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &spa::pod::Value::Object(obj),
    )
    .map_err(|e| format!("Failed to serialize audio format: {:?}", e))?
    .0
    .into_inner())
}

fn parse_format(format: &mut spa::param::audio::AudioInfoRaw, id: u32, param: Option<&Pod>) {
    let Some(param) = param else { return };
    if id != spa::param::ParamType::Format.as_raw() {
        return;
    }

    let (media_type, media_subtype) = match format_utils::parse_format(param) {
        Ok(v) => v,
        Err(_) => return,
    };

    if media_type != MediaType::Audio || media_subtype != MediaSubtype::Raw {
        return;
    }

    if let Err(e) = format.parse(param) {
        warn!("Failed to parse negotiated audio format: {:?}", e);
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

struct PipeWireCaptureDevice<S> {
    chunks: Receiver<Vec<f32>>,
    _stream: StreamThread,
    _marker: PhantomData<S>,
}

impl<S: Sample> CaptureDevice<S> for PipeWireCaptureDevice<S> {
    fn read_chunk(&mut self) -> Result<Vec<S>> {
        let chunk = self
            .chunks
            .recv()
            .map_err(|_| Error::device("PipeWire capture stream closed"))?;
        Ok(chunk.into_iter().map(S::from_f32).collect())
    }
}

impl<S: Sample> CaptureBackend<S> for PipeWireBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    fn open_capture(&self) -> Result<Box<dyn CaptureDevice<S>>> {
        let (chunk_tx, chunk_rx) = bounded(CAPTURE_QUEUE);
        let sample_rate = self.sample_rate;
        let chunk_samples = self.chunk_samples;

        let stream = StreamThread::spawn("tapeloop-pw-capture", move |commands, ready| {
            run_capture_stream(sample_rate, chunk_samples, chunk_tx, commands, ready)
        })?;
        debug!("PipeWire capture stream connected");

        Ok(Box::new(PipeWireCaptureDevice {
            chunks: chunk_rx,
            _stream: stream,
            _marker: PhantomData,
        }))
    }
}

fn run_capture_stream(
    sample_rate: u32,
    chunk_samples: usize,
    chunks: Sender<Vec<f32>>,
    commands: pw::channel::Receiver<StreamCommand>,
    ready: Sender<Result<()>>,
) -> std::result::Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _commands = commands.attach(mainloop.loop_(), move |cmd| match cmd {
        StreamCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        pending: Vec<f32>,
        chunk_samples: usize,
        chunks: Sender<Vec<f32>>,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let user_data = UserData {
        format: Default::default(),
        pending: Vec::with_capacity(chunk_samples * 2),
        chunk_samples: chunk_samples.max(1),
        chunks,
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, "tapeloop-capture", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            parse_format(&mut user_data.format, id, param);
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let n_samples = data.chunk().size() as usize / SAMPLE_BYTES;

            if let Some(raw_samples) = data.data() {
                // Keep the first channel if the server hands us more than mono
                for i in (0..n_samples).step_by(n_channels) {
                    let start = i * SAMPLE_BYTES;
                    let end = start + SAMPLE_BYTES;
                    if end <= raw_samples.len() {
                        let sample = f32::from_le_bytes(
                            raw_samples[start..end].try_into().unwrap_or([0; 4]),
                        );
                        user_data.pending.push(sample);
                    }
                }
            }

            while user_data.pending.len() >= user_data.chunk_samples {
                let rest = user_data.pending.split_off(user_data.chunk_samples);
                let chunk = std::mem::replace(&mut user_data.pending, rest);
                match user_data.chunks.try_send(chunk) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => trace!("capture queue full, dropping chunk"),
                    Err(TrySendError::Disconnected(_)) => {
                        if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                            mainloop.quit();
                        }
                        return;
                    }
                }
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let values = format_params(sample_rate)?;
    let pod = Pod::from_bytes(&values).ok_or("Failed to build format pod")?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    let _ = ready.send(Ok(()));
    mainloop.run();

    Ok(())
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

struct PipeWirePlaybackDevice<S> {
    /// Dropped on `finish()` to tell the stream no more audio is coming.
    chunks: Option<Sender<Vec<f32>>>,
    stream: StreamThread,
    sample_rate: u32,
    largest_chunk: usize,
    _marker: PhantomData<S>,
}

impl<S: Sample> PlaybackDevice<S> for PipeWirePlaybackDevice<S> {
    fn write_chunk(&mut self, chunk: &[S]) -> Result<()> {
        let sender = self
            .chunks
            .as_ref()
            .ok_or_else(|| Error::device("PipeWire playback already finished"))?;
        self.largest_chunk = self.largest_chunk.max(chunk.len());
        let samples = chunk.iter().map(|s| s.to_f32()).collect();
        sender
            .send(samples)
            .map_err(|_| Error::device("PipeWire playback stream closed"))
    }

    fn finish(&mut self) -> Result<()> {
        self.chunks = None;
        let queued = (PLAYBACK_QUEUE + 1) * self.largest_chunk;
        let limit = Duration::from_secs_f64(queued as f64 / self.sample_rate.max(1) as f64);
        self.stream.wait(limit + DRAIN_SLACK);
        debug!("PipeWire playback drained");
        Ok(())
    }
}

impl<S: Sample> PlaybackBackend<S> for PipeWireBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_playback(&self) -> Result<Box<dyn PlaybackDevice<S>>> {
        let (chunk_tx, chunk_rx) = bounded(PLAYBACK_QUEUE);
        let sample_rate = self.sample_rate;

        let stream = StreamThread::spawn("tapeloop-pw-playback", move |commands, ready| {
            run_playback_stream(sample_rate, chunk_rx, commands, ready)
        })?;
        debug!("PipeWire playback stream connected");

        Ok(Box::new(PipeWirePlaybackDevice {
            chunks: Some(chunk_tx),
            stream,
            sample_rate,
            largest_chunk: 0,
            _marker: PhantomData,
        }))
    }
}

fn run_playback_stream(
    sample_rate: u32,
    chunks: Receiver<Vec<f32>>,
    commands: pw::channel::Receiver<StreamCommand>,
    ready: Sender<Result<()>>,
) -> std::result::Result<(), String> {
    pw::init();

    let mainloop = pw::main_loop::MainLoopRc::new(None)
        .map_err(|e| format!("Failed to create PipeWire main loop: {}", e))?;

    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| format!("Failed to create PipeWire context: {}", e))?;

    let core = context
        .connect_rc(None)
        .map_err(|e| format!("Failed to connect to PipeWire: {}", e))?;

    let mainloop_weak = mainloop.downgrade();
    let _commands = commands.attach(mainloop.loop_(), move |cmd| match cmd {
        StreamCommand::Stop => {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        pending: VecDeque<f32>,
        chunks: Receiver<Vec<f32>>,
        /// The writer hung up; quit once everything queued has played.
        draining: bool,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let user_data = UserData {
        format: Default::default(),
        pending: VecDeque::new(),
        chunks,
        draining: false,
        mainloop_weak: mainloop.downgrade(),
    };

    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Playback",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::APP_NAME => APP_NAME,
    };

    let stream = pw::stream::StreamBox::new(&core, "tapeloop-playback", props)
        .map_err(|e| format!("Failed to create PipeWire stream: {}", e))?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            parse_format(&mut user_data.format, id, param);
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let n_channels = user_data.format.channels().max(1) as usize;
            let stride = SAMPLE_BYTES * n_channels;

            let Some(slice) = data.data() else {
                return;
            };

            let n_frames = slice.len() / stride;

            while user_data.pending.len() < n_frames {
                match user_data.chunks.try_recv() {
                    Ok(chunk) => user_data.pending.extend(chunk),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        user_data.draining = true;
                        break;
                    }
                }
            }

            let available = user_data.pending.len().min(n_frames);
            // the previous period carried the last samples
            let drained = available == 0 && user_data.draining;
            for (i, sample) in user_data.pending.drain(..available).enumerate() {
                let bytes = sample.to_le_bytes();
                for channel in 0..n_channels {
                    let offset = i * stride + channel * SAMPLE_BYTES;
                    slice[offset..offset + SAMPLE_BYTES].copy_from_slice(&bytes);
                }
            }

            // Underrun: pad the period with silence
            let written = available * stride;
            let filled = n_frames * stride;
            if written < filled {
                slice[written..filled].fill(0);
            }

            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = filled as u32;

            if drained {
                if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                    mainloop.quit();
                }
            }
        })
        .register()
        .map_err(|e| format!("Failed to register stream listener: {}", e))?;

    let values = format_params(sample_rate)?;
    let pod = Pod::from_bytes(&values).ok_or("Failed to build format pod")?;
    let mut params = [pod];

    stream
        .connect(
            spa::utils::Direction::Output,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| format!("Failed to connect stream: {}", e))?;

    let _ = ready.send(Ok(()));
    mainloop.run();

    Ok(())
}
