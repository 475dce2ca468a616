//! Holds the currently loaded reference and vocal float buffers.
//!
//! Guarded by a mutex that the host thread takes for a `load*` call and the
//! realtime callback takes for the full duration of its mix loop — the
//! only place the realtime thread locks anything, permitted only because
//! the host contract forbids loading while playback is active.

use std::sync::Mutex;

use crate::error::EngineError;
use crate::wav;

#[derive(Debug, Clone, Default)]
pub struct Track {
    pub samples: Vec<f32>,
    pub channels: u16,
}

impl Track {
    /// Sample value at frame `frame`, channel `ch`, or `0.0` outside the
    /// buffer — silence outside bounds, never clamping to the last sample.
    #[inline]
    pub fn sample_at(&self, frame: i64, ch: u16) -> f32 {
        if frame < 0 || self.channels == 0 {
            return 0.0;
        }
        let idx = frame as usize * self.channels as usize + ch.min(self.channels - 1) as usize;
        self.samples.get(idx).copied().unwrap_or(0.0)
    }

    pub fn len_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }
}

pub struct TrackStore {
    inner: Mutex<Inner>,
}

struct Inner {
    reference: Track,
    vocal: Track,
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                reference: Track::default(),
                vocal: Track::default(),
            }),
        }
    }

    /// Load the reference track, resampling to `engine_rate` if the file's
    /// native rate differs. Reference keeps its native channel count.
    pub fn load_reference_bytes(&self, bytes: &[u8], engine_rate: u32) -> Result<(), EngineError> {
        let decoded = wav::load_bytes(bytes)?;
        let samples = if decoded.source_sample_rate != engine_rate {
            wav::resample_linear(&decoded.samples, decoded.channels, decoded.source_sample_rate, engine_rate)
        } else {
            decoded.samples
        };
        let mut inner = self.inner.lock().expect("track store mutex poisoned");
        inner.reference = Track {
            samples,
            channels: decoded.channels,
        };
        Ok(())
    }

    pub fn load_reference_path<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        engine_rate: u32,
    ) -> Result<(), EngineError> {
        let decoded = wav::load(path)?;
        let samples = if decoded.source_sample_rate != engine_rate {
            wav::resample_linear(&decoded.samples, decoded.channels, decoded.source_sample_rate, engine_rate)
        } else {
            decoded.samples
        };
        let mut inner = self.inner.lock().expect("track store mutex poisoned");
        inner.reference = Track {
            samples,
            channels: decoded.channels,
        };
        Ok(())
    }

    /// Load the vocal track; always downmixed to mono after resampling.
    /// No loudness compensation is applied.
    pub fn load_vocal_bytes(&self, bytes: &[u8], engine_rate: u32) -> Result<(), EngineError> {
        let decoded = wav::load_bytes(bytes)?;
        let resampled = if decoded.source_sample_rate != engine_rate {
            wav::resample_linear(&decoded.samples, decoded.channels, decoded.source_sample_rate, engine_rate)
        } else {
            decoded.samples
        };
        let mono = wav::downmix_to_mono(&resampled, decoded.channels);
        let mut inner = self.inner.lock().expect("track store mutex poisoned");
        inner.vocal = Track {
            samples: mono,
            channels: 1,
        };
        Ok(())
    }

    pub fn load_vocal_path<P: AsRef<std::path::Path>>(
        &self,
        path: P,
        engine_rate: u32,
    ) -> Result<(), EngineError> {
        let decoded = wav::load(path)?;
        let resampled = if decoded.source_sample_rate != engine_rate {
            wav::resample_linear(&decoded.samples, decoded.channels, decoded.source_sample_rate, engine_rate)
        } else {
            decoded.samples
        };
        let mono = wav::downmix_to_mono(&resampled, decoded.channels);
        let mut inner = self.inner.lock().expect("track store mutex poisoned");
        inner.vocal = Track {
            samples: mono,
            channels: 1,
        };
        Ok(())
    }

    pub fn reference_channels(&self) -> u16 {
        self.inner.lock().expect("track store mutex poisoned").reference.channels
    }

    /// Run `f` with the mutex held for its full duration — this is the
    /// realtime callback's mix-loop lock, taken once per output callback.
    pub fn with_tracks<R>(&self, f: impl FnOnce(&Track, &Track) -> R) -> R {
        let inner = self.inner.lock().expect("track store mutex poisoned");
        f(&inner.reference, &inner.vocal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_wav_bytes(freq: f32, seconds: f32, rate: u32, channels: u16) -> Vec<u8> {
        let n = (seconds * rate as f32) as u32;
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..n {
                let v = (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin();
                let s = (v * 32767.0) as i16;
                for _ in 0..channels {
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn load_vocal_downmixes_stereo_to_mono() {
        let bytes = sine_wav_bytes(440.0, 0.01, 48000, 2);
        let store = TrackStore::new();
        store.load_vocal_bytes(&bytes, 48000).unwrap();
        store.with_tracks(|_, voc| {
            assert_eq!(voc.channels, 1);
            assert!(voc.len_frames() > 0);
        });
    }

    #[test]
    fn load_reference_keeps_native_channel_count() {
        let bytes = sine_wav_bytes(440.0, 0.01, 48000, 2);
        let store = TrackStore::new();
        store.load_reference_bytes(&bytes, 48000).unwrap();
        assert_eq!(store.reference_channels(), 2);
    }

    #[test]
    fn sample_at_out_of_bounds_is_silence() {
        let track = Track {
            samples: vec![1.0, 2.0],
            channels: 1,
        };
        assert_eq!(track.sample_at(-1, 0), 0.0);
        assert_eq!(track.sample_at(5, 0), 0.0);
        assert_eq!(track.sample_at(0, 0), 1.0);
    }
}
