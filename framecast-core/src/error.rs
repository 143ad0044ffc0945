//! Domain-specific error types for the framecast pipeline.
//!
//! All fallible operations return `Result<T, StreamError>`.
//! No panics on invalid input: every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for the framecast pipeline.
#[derive(Debug, Error)]
pub enum StreamError {
    // ── Device Errors ────────────────────────────────────────────
    /// The capture device could not be opened.
    #[error("device open failed: {0}")]
    DeviceOpen(String),

    /// The capture device failed mid-stream (disconnect, read fault).
    #[error("device read failed: {0}")]
    DeviceRead(String),

    /// All restart attempts were exhausted; the source is terminally down.
    #[error("source unavailable after {attempts} failed attempts")]
    SourceUnavailable { attempts: u32 },

    /// A capture lifecycle transition was requested from the wrong state.
    #[error("invalid capture transition: {0}")]
    InvalidTransition(&'static str),

    // ── Codec Errors ─────────────────────────────────────────────
    /// The encoded payload exceeds the transport's maximum packet size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload could not be decoded back into an image.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A frame buffer does not match its declared geometry.
    #[error("invalid frame buffer: expected {expected} bytes, got {actual}")]
    InvalidFrameBuffer { expected: usize, actual: usize },

    // ── Transport Errors ─────────────────────────────────────────
    /// The socket/IO layer reported an error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport could not hand a packet to the network.
    #[error("publish failed: {0}")]
    Publish(String),

    // ── Configuration Errors ─────────────────────────────────────
    /// A session parameter is missing or out of range.
    #[error("config error: {0}")]
    Config(String),

    /// The destination endpoint could not be parsed or resolved.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(s)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(s.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for StreamError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        StreamError::Encoding(e.to_string())
    }
}

impl From<image::ImageError> for StreamError {
    fn from(e: image::ImageError) -> Self {
        StreamError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = StreamError::PayloadTooLarge {
            size: 100_000,
            max: 65_000,
        };
        assert!(e.to_string().contains("100000"));
        assert!(e.to_string().contains("65000"));

        let e = StreamError::SourceUnavailable { attempts: 5 };
        assert!(e.to_string().contains("5"));
    }

    #[test]
    fn from_string() {
        let e: StreamError = "something broke".into();
        assert!(matches!(e, StreamError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: StreamError = io_err.into();
        assert!(matches!(e, StreamError::Io(_)));
    }

    #[test]
    fn from_bincode() {
        let res: Result<u32, _> = bincode::deserialize(&[0xff]);
        let e: StreamError = res.unwrap_err().into();
        assert!(matches!(e, StreamError::Encoding(_)));
    }
}
