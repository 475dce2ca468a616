//! WAV file writer attached to the live duplex stream.
//!
//! [`TransportRecorder::open`] is called from the host thread;
//! [`TransportRecorder::write_frame`] is called once per realtime callback
//! while recording is active. `close` is host-thread again and patches the
//! header written by [`crate::wav::StreamingWriter`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU32, Ordering};
use std::sync::Mutex;

use log::error;

use crate::error::EngineError;
use crate::wav::{self, StreamingWriter};

pub struct TransportRecorder {
    writer: Mutex<Option<StreamingWriter>>,
    is_recording: AtomicBool,
    record_start_frame: AtomicI64,
    playback_start_frame: AtomicI64,
    record_bytes: AtomicU64,
    peak_bits: AtomicU32,
}

impl Default for TransportRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRecorder {
    pub fn new() -> Self {
        Self {
            writer: Mutex::new(None),
            is_recording: AtomicBool::new(false),
            record_start_frame: AtomicI64::new(-1),
            playback_start_frame: AtomicI64::new(-1),
            record_bytes: AtomicU64::new(0),
            peak_bits: AtomicU32::new(0),
        }
    }

    /// Open `path`, write the placeholder header, and arm recording.
    pub fn open<P: AsRef<Path>>(
        &self,
        path: P,
        channels: u16,
        sample_rate: u32,
    ) -> Result<(), EngineError> {
        let writer = StreamingWriter::create(path, channels, sample_rate)?;
        *self.writer.lock().expect("transport writer mutex poisoned") = Some(writer);
        self.record_start_frame.store(-1, Ordering::SeqCst);
        self.record_bytes.store(0, Ordering::SeqCst);
        self.peak_bits.store(0, Ordering::SeqCst);
        self.is_recording.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    /// Called once per realtime callback while recording. `pcm_mono` is the
    /// chunk's downmixed PCM16 payload; `capture_base` is the chunk's
    /// `playFrame` anchor. On the first successful write of a session,
    /// records `record_start_frame = capture_base`.
    pub fn write_frame(&self, pcm_mono: &[i16], capture_base: i64) {
        if !self.is_recording.load(Ordering::SeqCst) {
            return;
        }

        let mut guard = self.writer.lock().expect("transport writer mutex poisoned");
        let Some(writer) = guard.as_mut() else {
            return;
        };

        if let Err(e) = writer.write_frames(pcm_mono) {
            error!("transport write failed: {e}");
            return;
        }

        if self.record_start_frame.load(Ordering::SeqCst) < 0 {
            self.record_start_frame.store(capture_base, Ordering::SeqCst);
        }
        self.record_bytes
            .fetch_add((pcm_mono.len() * 2) as u64, Ordering::SeqCst);

        let peak = pcm_mono.iter().map(|&s| s.unsigned_abs()).max().unwrap_or(0);
        self.peak_bits.fetch_max(peak as u32, Ordering::SeqCst);
    }

    /// Clear `isRecording`, patch the header, and close the file. Logs if
    /// nothing was ever written — the host must treat a 44-byte file as a
    /// failed take.
    pub fn close(&self) -> Result<(), EngineError> {
        self.is_recording.store(false, Ordering::SeqCst);
        let writer = self
            .writer
            .lock()
            .expect("transport writer mutex poisoned")
            .take();
        let Some(writer) = writer else {
            return Ok(());
        };

        let frames_written = writer.frames_written();
        writer.finish()?;

        if frames_written == 0 {
            error!("transport recorder closed with zero frames written");
        }
        Ok(())
    }

    pub fn record_start_frame(&self) -> i64 {
        self.record_start_frame.load(Ordering::SeqCst)
    }

    pub fn playback_start_frame(&self) -> i64 {
        self.playback_start_frame.load(Ordering::SeqCst)
    }

    pub fn set_playback_start_frame(&self, frame: i64) {
        self.playback_start_frame.store(frame, Ordering::SeqCst);
    }

    pub fn record_bytes(&self) -> u64 {
        self.record_bytes.load(Ordering::SeqCst)
    }

    /// Debug peak amplitude seen since the last `open`, normalized to
    /// `[0.0, 1.0]`.
    pub fn peak(&self) -> f32 {
        self.peak_bits.load(Ordering::SeqCst) as f32 / 32768.0
    }
}

/// Downmix an interleaved float32 frame chunk to mono PCM16, matching the
/// realtime callback's encode step.
pub fn downmix_chunk_to_pcm16(samples: &[f32], channels: u16) -> Vec<i16> {
    wav::downmix_to_mono(samples, channels)
        .iter()
        .map(|&s| wav::float_to_pcm16(s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_write_close_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let recorder = TransportRecorder::new();

        recorder.open(&path, 1, 48000).unwrap();
        assert!(recorder.is_recording());

        let chunk: Vec<i16> = (0..480i32).map(|i| (i % 100) as i16).collect();
        recorder.write_frame(&chunk, 0);
        recorder.write_frame(&chunk, 480);

        assert_eq!(recorder.record_start_frame(), 0);
        assert_eq!(recorder.record_bytes(), (chunk.len() * 2 * 2) as u64);

        recorder.close().unwrap();
        assert!(!recorder.is_recording());

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), wav::expected_file_size(960));
    }

    #[test]
    fn close_without_writes_leaves_header_only_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let recorder = TransportRecorder::new();
        recorder.open(&path, 1, 48000).unwrap();
        recorder.close().unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), 44);
    }

    #[test]
    fn write_frame_ignored_when_not_recording() {
        let recorder = TransportRecorder::new();
        recorder.write_frame(&[1, 2, 3], 0);
        assert_eq!(recorder.record_bytes(), 0);
        assert_eq!(recorder.record_start_frame(), -1);
    }

    #[test]
    fn peak_tracks_loudest_sample() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("peak.wav");
        let recorder = TransportRecorder::new();
        recorder.open(&path, 1, 48000).unwrap();

        recorder.write_frame(&[100, -200, 50], 0);
        recorder.write_frame(&[10, 300, -5], 3);
        recorder.close().unwrap();

        assert_eq!(recorder.peak(), 300.0 / 32768.0);
    }

    #[test]
    fn downmix_chunk_to_pcm16_clamps_and_converts() {
        let stereo = vec![1.0, 1.0, -1.0, -1.0];
        let out = downmix_chunk_to_pcm16(&stereo, 2);
        assert_eq!(out, vec![32767, -32767]);
    }
}
