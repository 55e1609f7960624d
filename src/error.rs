//! Error types shared by the buffer, engines and configuration layer

/// Result alias that carries the crate [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the library.
///
/// The controller never returns these to its caller: engine level failures
/// are logged and absorbed so every command can be issued unconditionally.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A capture or playback device could not be opened, or failed mid-stream.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A buffer access outside `0..len` (reads) or `0..=len` (writes).
    #[error("chunk index {index} out of range for buffer of {len} chunks")]
    IndexOutOfRange { index: usize, len: usize },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn device<T: Into<String>>(msg: T) -> Self {
        Self::DeviceUnavailable(msg.into())
    }
}
