//! Engine error taxonomy.
//!
//! Realtime-path failures (`RingOverflow`, `AsyncDeviceError`) never reach
//! a host call through `?`; they are logged and counted from inside the
//! engine. Everything else here is returned from a host-facing method.

use thiserror::Error;

#[derive(Debug, Error, uniffi::Error)]
#[uniffi(flat_error)]
pub enum EngineError {
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    #[error("malformed WAV: {0}")]
    MalformedWav(String),

    #[error("failed to open audio stream: {0}")]
    StreamOpenFailure(String),

    /// Diagnostic only; a ring push failing never propagates to a caller.
    /// The variant exists so `CaptureDispatcher`/`DuplexEngine` can log a
    /// structured event when incrementing the overflow counter.
    #[error("capture ring overflow, packet dropped")]
    RingOverflow,

    #[error("transport file I/O failed: {0}")]
    FileIoFailure(String),

    /// Raised internally when the platform signals stream death; the
    /// engine reacts by transitioning to `Stopped`, it is never returned
    /// from a host call.
    #[error("audio device error: {0}")]
    AsyncDeviceError(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
