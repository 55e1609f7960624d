//! Device backends

pub mod memory;
#[cfg(feature = "pipewire")]
pub mod pipewire;
pub mod synthetic;

#[cfg(feature = "pipewire")]
pub use self::pipewire::PipeWireBackend;
pub use memory::{MemoryCapture, MemorySink};
pub use synthetic::{NullSink, ToneCapture};
