//! Tapeloop - a chunked loop recorder
//!
//! Captures microphone audio into an in-memory buffer of fixed-size chunks
//! and plays it back from a movable cursor, optionally looping, through a
//! gain and low-pass chain.

pub mod audio;
pub mod controller;
pub mod error;
pub mod settings;

pub use controller::{ChunkSummary, ControllerEvent, PlaybackController, PlaybackState, PlaybackTimer};
pub use error::{Error, Result};
