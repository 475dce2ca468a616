//! Mobile host FFI surface, generated via `uniffi`.
//!
//! Wraps [`crate::engine::DuplexEngine`] in a `uniffi::Object` with a
//! process-lifetime singleton accessor, and adapts the host's capture
//! callback interface onto [`crate::capture::HostCaptureSink`].

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use crate::capture::{CapturePacket, HostCaptureSink};
use crate::engine::DuplexEngine;
use crate::error::EngineError;

uniffi::setup_scaffolding!("vocal_engine");

/// One capture packet delivered to the host: `HostCaptureSink::on_captured`
/// flattened into an FFI record.
#[derive(Debug, Clone, uniffi::Record)]
pub struct CapturePacketFfi {
    pub pcm16_bytes: Vec<u8>,
    pub num_frames: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub input_frame_pos: i64,
    pub output_frame_pos: i64,
    pub timestamp_nanos: i64,
    pub output_frame_pos_rel: i64,
    pub session_id: i32,
}

impl From<CapturePacket> for CapturePacketFfi {
    fn from(p: CapturePacket) -> Self {
        Self {
            pcm16_bytes: p.pcm16,
            num_frames: p.meta.num_frames,
            sample_rate: p.meta.sample_rate,
            channels: p.meta.channels,
            input_frame_pos: p.meta.input_frame_pos,
            output_frame_pos: p.meta.output_frame_pos,
            timestamp_nanos: p.meta.timestamp_nanos,
            output_frame_pos_rel: p.meta.output_frame_pos_rel,
            session_id: p.meta.session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, uniffi::Record)]
pub struct EngineSnapshotFfi {
    pub session_id: i32,
    pub session_start_frame: i64,
    pub first_capture_output_frame: i64,
    pub last_output_frame: i64,
    pub computed_voc_offset_frames: i32,
    pub has_first_capture: bool,
}

impl From<crate::engine::EngineSnapshot> for EngineSnapshotFfi {
    fn from(s: crate::engine::EngineSnapshot) -> Self {
        Self {
            session_id: s.session_id,
            session_start_frame: s.session_start_frame,
            first_capture_output_frame: s.first_capture_output_frame,
            last_output_frame: s.last_output_frame,
            computed_voc_offset_frames: s.computed_voc_offset_frames,
            has_first_capture: s.has_first_capture,
        }
    }
}

/// Host-implemented sink; the host is responsible for dropping packets
/// whose `session_id` does not match the session it currently observes.
#[uniffi::export(callback_interface)]
pub trait HostCaptureCallback: Send + Sync {
    fn on_captured(&self, packet: CapturePacketFfi);
}

struct CallbackSinkAdapter(Box<dyn HostCaptureCallback>);

impl HostCaptureSink for CallbackSinkAdapter {
    fn on_captured(&self, packet: CapturePacket) {
        self.0.on_captured(packet.into());
    }
}

/// Host-facing wrapper over [`DuplexEngine`].
#[derive(uniffi::Object)]
pub struct VocalEngineHandle {
    inner: DuplexEngine,
}

#[uniffi::export]
impl VocalEngineHandle {
    #[uniffi::constructor]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: DuplexEngine::new() })
    }

    pub fn prepare_for_record(&self) -> Result<(), EngineError> {
        self.inner.prepare_for_record()
    }

    pub fn start_duplex(&self, sample_rate: i32, channels: i32) -> Result<(), EngineError> {
        self.inner.start_duplex(sample_rate as u32, channels as u16)
    }

    pub fn prepare_for_review(&self) -> Result<(), EngineError> {
        self.inner.prepare_for_review()
    }

    pub fn start_playback_two_track(&self) -> Result<(), EngineError> {
        self.inner.start_playback_two_track()
    }

    pub fn stop(&self) -> Result<(), EngineError> {
        self.inner.stop()
    }

    pub fn load_reference(&self, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.inner.load_reference_bytes(&bytes)
    }

    pub fn load_reference_path(&self, path: String) -> Result<(), EngineError> {
        self.inner.load_reference_path(PathBuf::from(path))
    }

    pub fn load_vocal(&self, bytes: Vec<u8>) -> Result<(), EngineError> {
        self.inner.load_vocal_bytes(&bytes)
    }

    pub fn load_vocal_path(&self, path: String) -> Result<(), EngineError> {
        self.inner.load_vocal_path(PathBuf::from(path))
    }

    pub fn set_gains(&self, gain_ref: f32, gain_voc: f32) {
        self.inner.set_gains(gain_ref, gain_voc);
    }

    pub fn set_vocal_offset(&self, frames: i32) {
        self.inner.set_vocal_offset(frames);
    }

    pub fn open_transport_record_file(&self, path: String) -> Result<(), EngineError> {
        self.inner.open_transport_record_file(PathBuf::from(path))
    }

    pub fn stop_transport_recording(&self) -> Result<(), EngineError> {
        self.inner.stop_transport_recording()
    }

    pub fn get_session_snapshot(&self) -> EngineSnapshotFfi {
        self.inner.session_snapshot().into()
    }

    pub fn get_playback_start_sample_time(&self) -> i64 {
        self.inner.playback_start_sample_time()
    }

    pub fn get_record_start_sample_time(&self) -> i64 {
        self.inner.record_start_sample_time()
    }

    pub fn get_record_bytes(&self) -> u64 {
        self.inner.record_bytes()
    }

    pub fn get_record_peak(&self) -> f32 {
        self.inner.record_peak()
    }

    pub fn get_ring_overflow_count(&self) -> u32 {
        self.inner.ring_overflow_count()
    }

    pub fn set_capture_callback(&self, callback: Box<dyn HostCaptureCallback>) {
        self.inner.set_capture_sink(Arc::new(CallbackSinkAdapter(callback)));
    }
}

static ENGINE_SINGLETON: OnceLock<Arc<VocalEngineHandle>> = OnceLock::new();

/// Process-lifetime engine instance. The engine is created on first use
/// and lives for the rest of the process.
#[uniffi::export]
pub fn engine_singleton() -> Arc<VocalEngineHandle> {
    ENGINE_SINGLETON.get_or_init(VocalEngineHandle::new).clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_returns_same_instance() {
        let a = engine_singleton();
        let b = engine_singleton();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn capture_packet_ffi_conversion_preserves_fields() {
        let packet = CapturePacket {
            pcm16: vec![1, 2, 3, 4],
            meta: crate::capture::CaptureMeta {
                num_frames: 2,
                sample_rate: 48000,
                channels: 1,
                input_frame_pos: 10,
                output_frame_pos: 10,
                timestamp_nanos: 0,
                output_frame_pos_rel: 10,
                session_id: 1,
            },
        };
        let ffi: CapturePacketFfi = packet.into();
        assert_eq!(ffi.pcm16_bytes, vec![1, 2, 3, 4]);
        assert_eq!(ffi.num_frames, 2);
        assert_eq!(ffi.session_id, 1);
    }
}
