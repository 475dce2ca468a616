//! RIFF/WAVE PCM16 codec: loading (via `hound`) into normalized float32,
//! a linear-interpolation resampler run only at load time, and a manual
//! streaming writer used by [`crate::transport::TransportRecorder`] to
//! interleave header/patch bookkeeping with realtime-thread appends.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::EngineError;

/// A decoded WAV file: interleaved float32 samples, in `[-1.0, 1.0]`-ish
/// range (not clamped — a hot/clipped source file stays hot), plus the
/// channel count and the sample rate the bytes were recorded at.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub source_sample_rate: u32,
}

/// Parse a RIFF/WAVE PCM16 file into normalized float32 samples.
///
/// `hound` already enforces the required format constraints (PCM, 16-bit,
/// a `data` chunk); any violation surfaces through `hound::Error`, which is
/// mapped here to [`EngineError::MalformedWav`].
pub fn load<P: AsRef<Path>>(path: P) -> Result<DecodedAudio, EngineError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| EngineError::MalformedWav(e.to_string()))?;
    decode(&mut reader)
}

/// Parse a RIFF/WAVE PCM16 buffer held entirely in memory.
pub fn load_bytes(bytes: &[u8]) -> Result<DecodedAudio, EngineError> {
    let cursor = std::io::Cursor::new(bytes);
    let mut reader =
        hound::WavReader::new(cursor).map_err(|e| EngineError::MalformedWav(e.to_string()))?;
    decode(&mut reader)
}

fn decode<R: Read>(reader: &mut hound::WavReader<R>) -> Result<DecodedAudio, EngineError> {
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(EngineError::MalformedWav(format!(
            "expected 16-bit PCM, got {:?} {} bit",
            spec.sample_format, spec.bits_per_sample
        )));
    }

    let samples: Vec<f32> = reader
        .samples::<i16>()
        .map(|s| s.map(|v| v as f32 / 32768.0))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| EngineError::MalformedWav(e.to_string()))?;

    Ok(DecodedAudio {
        samples,
        channels: spec.channels,
        source_sample_rate: spec.sample_rate,
    })
}

/// Resample interleaved multi-channel float32 audio from `src_rate` to
/// `dst_rate` using linear interpolation. Output frame count is
/// `floor(src_frames / (src_rate/dst_rate))`.
pub fn resample_linear(samples: &[f32], channels: u16, src_rate: u32, dst_rate: u32) -> Vec<f32> {
    let channels = channels as usize;
    if src_rate == dst_rate || channels == 0 {
        return samples.to_vec();
    }

    let src_frames = samples.len() / channels;
    let ratio = src_rate as f64 / dst_rate as f64;
    let dst_frames = (src_frames as f64 / ratio).floor() as usize;

    let mut out = Vec::with_capacity(dst_frames * channels);
    for i in 0..dst_frames {
        let pos = i as f64 * ratio;
        let idx0 = pos.floor() as usize;
        let frac = (pos - idx0 as f64) as f32;
        let idx1 = (idx0 + 1).min(src_frames.saturating_sub(1));

        for ch in 0..channels {
            let s0 = samples[idx0 * channels + ch];
            let s1 = samples[idx1 * channels + ch];
            out.push(s0 + (s1 - s0) * frac);
        }
    }
    out
}

/// Downmix interleaved multi-channel float32 audio to mono by averaging
/// channels.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let channels = channels as usize;
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert a float sample in `[-1.0, 1.0]` to PCM16, clamping out-of-range
/// input rather than wrapping.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0) as i16
}

const HEADER_LEN: u64 = 44;

/// A streaming WAV writer that writes a placeholder 44-byte header up
/// front, appends raw PCM16 frames via plain `File::write_all`, and
/// patches the RIFF/data size fields on close. Deliberately not
/// `hound::WavWriter`: the realtime callback in
/// [`crate::transport::TransportRecorder`] needs a bare file handle it can
/// append to without going through a buffered writer's internal state
/// machine between calls.
pub struct StreamingWriter {
    file: File,
    channels: u16,
    sample_rate: u32,
    frames_written: u64,
}

impl StreamingWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, EngineError> {
        let mut file = File::create(path).map_err(|e| EngineError::FileIoFailure(e.to_string()))?;
        write_header(&mut file, channels, sample_rate, 0)
            .map_err(|e| EngineError::FileIoFailure(e.to_string()))?;
        Ok(Self {
            file,
            channels,
            sample_rate,
            frames_written: 0,
        })
    }

    /// Append one chunk of interleaved PCM16 frames (little-endian).
    pub fn write_frames(&mut self, frames: &[i16]) -> Result<(), EngineError> {
        let mut bytes = Vec::with_capacity(frames.len() * 2);
        for s in frames {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        self.file
            .write_all(&bytes)
            .map_err(|e| EngineError::FileIoFailure(e.to_string()))?;
        self.frames_written += (frames.len() / self.channels.max(1) as usize) as u64;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Patch the RIFF/data size fields and flush. Consumes `self` so a
    /// closed writer cannot be written to again.
    pub fn finish(mut self) -> Result<(), EngineError> {
        let data_size = self.frames_written * self.channels.max(1) as u64 * 2;
        patch_sizes(&mut self.file, data_size).map_err(|e| EngineError::FileIoFailure(e.to_string()))?;
        self.file
            .flush()
            .map_err(|e| EngineError::FileIoFailure(e.to_string()))
    }
}

fn write_header(
    file: &mut File,
    channels: u16,
    sample_rate: u32,
    data_size: u32,
) -> std::io::Result<()> {
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;
    let riff_size = 36 + data_size;

    file.write_all(b"RIFF")?;
    file.write_all(&riff_size.to_le_bytes())?;
    file.write_all(b"WAVE")?;

    file.write_all(b"fmt ")?;
    file.write_all(&16u32.to_le_bytes())?; // fmt chunk size
    file.write_all(&1u16.to_le_bytes())?; // PCM
    file.write_all(&channels.to_le_bytes())?;
    file.write_all(&sample_rate.to_le_bytes())?;
    file.write_all(&byte_rate.to_le_bytes())?;
    file.write_all(&block_align.to_le_bytes())?;
    file.write_all(&16u16.to_le_bytes())?; // bits per sample

    file.write_all(b"data")?;
    file.write_all(&data_size.to_le_bytes())?;
    Ok(())
}

fn patch_sizes(file: &mut File, data_size: u64) -> std::io::Result<()> {
    let riff_size = 36u32 + data_size as u32;
    file.seek(SeekFrom::Start(4))?;
    file.write_all(&riff_size.to_le_bytes())?;
    file.seek(SeekFrom::Start(40))?;
    file.write_all(&(data_size as u32).to_le_bytes())?;
    file.seek(SeekFrom::End(0))?;
    Ok(())
}

/// Total file size a finished [`StreamingWriter`] recording `N` mono
/// PCM16 frames will have: `44 + 2N`.
pub const fn expected_file_size(frames: u64) -> u64 {
    HEADER_LEN + frames * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn resample_endpoints_44_1_to_48() {
        let src_rate = 44100u32;
        let dst_rate = 48000u32;
        let freq = 1000.0f32;
        let n = 4410; // 0.1s
        let samples: Vec<f32> = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / src_rate as f32).sin())
            .collect();

        let up = resample_linear(&samples, 1, src_rate, dst_rate);
        let expected_len = (n as f64 / (src_rate as f64 / dst_rate as f64)).floor() as usize;
        assert_eq!(up.len(), expected_len);

        let back = resample_linear(&up, 1, dst_rate, src_rate);
        // DC component (mean) should stay close after a round trip.
        let dc_before: f32 = samples.iter().sum::<f32>() / samples.len() as f32;
        let dc_after: f32 = back.iter().sum::<f32>() / back.len() as f32;
        assert!((dc_before - dc_after).abs() < 1.0 / 32768.0 * 4.0);
    }

    #[test]
    fn resample_identity_when_rates_match() {
        let samples = vec![0.1, 0.2, -0.3, 0.4];
        let out = resample_linear(&samples, 2, 48000, 48000);
        assert_eq!(out, samples);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0, -1.0, 0.5, 0.5];
        let mono = downmix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn streaming_writer_round_trips_bit_exact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("take.wav");

        let frames: Vec<i16> = (0..4800i32).map(|i| (i % 1000 - 500) as i16).collect();
        let mut writer = StreamingWriter::create(&path, 1, 48000).unwrap();
        writer.write_frames(&frames).unwrap();
        assert_eq!(writer.frames_written(), 4800);
        writer.finish().unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(metadata.len(), expected_file_size(4800));

        let decoded = load(&path).unwrap();
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.source_sample_rate, 48000);
        let recovered: Vec<i16> = decoded
            .samples
            .iter()
            .map(|&s| (s * 32768.0).round() as i16)
            .collect();
        assert_eq!(recovered, frames);
    }

    #[test]
    fn streaming_writer_header_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let writer = StreamingWriter::create(&path, 1, 48000).unwrap();
        writer.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 0);
    }

    #[test]
    fn malformed_wav_rejected() {
        // Float-format "fmt " chunk instead of PCM16: 44-byte header with
        // format tag 3, 32-bit samples, no payload.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&36u32.to_le_bytes());
        bytes.extend_from_slice(b"WAVE");
        bytes.extend_from_slice(b"fmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&3u16.to_le_bytes()); // IEEE float
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&48000u32.to_le_bytes());
        bytes.extend_from_slice(&192000u32.to_le_bytes());
        bytes.extend_from_slice(&4u16.to_le_bytes());
        bytes.extend_from_slice(&32u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&0u32.to_le_bytes());

        assert!(load_bytes(&bytes).is_err());
    }
}
