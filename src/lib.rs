//! # vocal_engine
//!
//! A cross-platform duplex audio engine for recording a vocal take against
//! a reference track on a single monotonic sample clock, then reviewing it
//! with sample-accurate alignment.
//!
//! ## Architecture
//!
//! - [`byte_ring`]: lock-free SPSC byte ring, used for both capture PCM and
//!   capture metadata.
//! - [`wav`]: RIFF/WAVE PCM16 parsing, the load-time linear resampler, and
//!   the realtime-attached streaming writer.
//! - [`track_store`]: holds the currently loaded reference and vocal
//!   buffers.
//! - [`session`]: session identity and the first-capture vocal-offset
//!   computation.
//! - [`transport`]: the WAV writer attached to the live duplex stream.
//! - [`capture`]: capture metadata layout, the host sink trait, and the
//!   background dispatcher.
//! - [`engine`]: the realtime audio callback and lifecycle controller.
//! - [`config`]: host-side convenience configuration.
//! - [`ffi`]: the `uniffi`-generated mobile host surface.
//!
//! ## Quick start
//!
//! ```no_run
//! use vocal_engine::engine::DuplexEngine;
//!
//! let engine = DuplexEngine::new();
//! engine.prepare_for_record()?;
//! engine.start_duplex(48000, 1)?;
//! engine.open_transport_record_file("take.wav")?;
//! // ... record for a while ...
//! engine.stop_transport_recording()?;
//! engine.stop()?;
//! # Ok::<(), vocal_engine::error::EngineError>(())
//! ```

pub mod byte_ring;
pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod session;
pub mod track_store;
pub mod transport;
pub mod wav;

#[cfg(test)]
mod tests;

pub use capture::{CaptureMeta, CapturePacket, HostCaptureSink};
pub use config::EngineConfig;
pub use engine::{DuplexEngine, EngineSnapshot, Mode};
pub use error::EngineError;
