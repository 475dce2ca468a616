//! The realtime audio callback and lifecycle controller.
//!
//! `DuplexEngine` owns the cpal streams, the master clock (`play_frame`),
//! mode selection, gain atomics, and the vocal-offset atomic, and drives
//! rendering and capture on every output callback.

use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use log::{error, info, warn};

use crate::byte_ring::ByteRing;
use crate::capture::{CaptureDispatcher, CaptureMeta, HostCaptureSink, CAPTURE_META_SIZE};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::session::SessionState;
use crate::track_store::TrackStore;
use crate::transport::{downmix_chunk_to_pcm16, TransportRecorder};

const SCRATCH_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Record,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Uninitialized,
    Prepared(Mode),
    Running(Mode),
    Stopped,
}

/// Host-visible snapshot combining session state with the engine's own
/// clock fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub session_id: i32,
    pub session_start_frame: i64,
    pub first_capture_output_frame: i64,
    pub last_output_frame: i64,
    pub computed_voc_offset_frames: i32,
    pub has_first_capture: bool,
}

struct NullCaptureSink;

impl HostCaptureSink for NullCaptureSink {
    fn on_captured(&self, _packet: crate::capture::CapturePacket) {}
}

/// Mixed value for one output channel at one frame. No allocation; safe to
/// call directly from the realtime callback's per-sample loop.
#[inline]
fn mix_channel_sample(
    reference: &crate::track_store::Track,
    vocal: &crate::track_store::Track,
    gain_ref: f32,
    effective_gain_voc: f32,
    voc_offset_frames: i32,
    frame_idx: i64,
    ch: u16,
) -> f32 {
    let voc_frame = frame_idx - voc_offset_frames as i64;
    let r = reference.sample_at(frame_idx, ch) * gain_ref;
    let v = vocal.sample_at(voc_frame, 0) * effective_gain_voc;
    r + v
}

/// Render one output frame's worth of samples for `channels` output
/// channels, given the reference/vocal tracks, gains, and the current
/// mode. Pulled out of the callback so it can be exercised without a
/// real audio device; the callback itself uses [`mix_channel_sample`]
/// directly to avoid allocating a `Vec` per frame.
pub fn render_frame(
    reference: &crate::track_store::Track,
    vocal: &crate::track_store::Track,
    gain_ref: f32,
    gain_voc: f32,
    voc_offset_frames: i32,
    frame_idx: i64,
    channels: u16,
    mode: Mode,
) -> Vec<f32> {
    let effective_gain_voc = if mode == Mode::Record { 0.0 } else { gain_voc };

    (0..channels)
        .map(|ch| mix_channel_sample(reference, vocal, gain_ref, effective_gain_voc, voc_offset_frames, frame_idx, ch))
        .collect()
}

/// Fields shared with the realtime callback closures. Grouped so a single
/// `Arc` clone per closure carries everything the callback needs, rather
/// than cloning each atomic counter into its closure individually.
struct Shared {
    play_frame: AtomicI64,
    last_output_frame: AtomicI64,
    gain_ref_bits: AtomicU32,
    gain_voc_bits: AtomicU32,
    voc_offset_frames: AtomicI32,
    engine_sample_rate: AtomicU32,
    ring_overflow_count: AtomicU32,
}

impl Shared {
    fn gain_ref(&self) -> f32 {
        f32::from_bits(self.gain_ref_bits.load(Ordering::SeqCst))
    }

    fn gain_voc(&self) -> f32 {
        f32::from_bits(self.gain_voc_bits.load(Ordering::SeqCst))
    }
}

/// The duplex audio engine. One instance is a process-lifetime singleton
/// on the host side; nothing here prevents constructing more than one for
/// tests.
pub struct DuplexEngine {
    state: Mutex<EngineState>,
    shared: Arc<Shared>,
    session: Arc<SessionState>,
    track_store: Arc<TrackStore>,
    transport: Arc<TransportRecorder>,

    meta_ring: Arc<ByteRing>,
    pcm_ring: Arc<ByteRing>,
    input_feed: Arc<ByteRing>,
    dispatcher_poll_interval: Duration,

    capture_sink: Mutex<Arc<dyn HostCaptureSink>>,
    dispatcher: Mutex<Option<CaptureDispatcher>>,

    input_stream: Mutex<Option<Stream>>,
    output_stream: Mutex<Option<Stream>>,
}

impl Default for DuplexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DuplexEngine {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Build an engine whose ring capacities and dispatcher poll interval
    /// come from `config.rings` rather than the built-in defaults.
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(EngineState::Uninitialized),
            shared: Arc::new(Shared {
                play_frame: AtomicI64::new(0),
                last_output_frame: AtomicI64::new(0),
                gain_ref_bits: AtomicU32::new(1.0f32.to_bits()),
                gain_voc_bits: AtomicU32::new(0.0f32.to_bits()),
                voc_offset_frames: AtomicI32::new(0),
                engine_sample_rate: AtomicU32::new(48000),
                ring_overflow_count: AtomicU32::new(0),
            }),
            session: Arc::new(SessionState::new()),
            track_store: Arc::new(TrackStore::new()),
            transport: Arc::new(TransportRecorder::new()),
            meta_ring: Arc::new(ByteRing::new(config.rings.meta_ring_capacity)),
            pcm_ring: Arc::new(ByteRing::new(config.rings.pcm_ring_capacity)),
            input_feed: Arc::new(ByteRing::new(config.rings.input_feed_capacity)),
            dispatcher_poll_interval: Duration::from_millis(config.rings.dispatcher_poll_interval_ms),
            capture_sink: Mutex::new(Arc::new(NullCaptureSink)),
            dispatcher: Mutex::new(None),
            input_stream: Mutex::new(None),
            output_stream: Mutex::new(None),
        }
    }

    pub fn track_store(&self) -> &Arc<TrackStore> {
        &self.track_store
    }

    pub fn set_capture_sink(&self, sink: Arc<dyn HostCaptureSink>) {
        *self.capture_sink.lock().expect("capture sink mutex poisoned") = sink;
    }

    fn state(&self) -> EngineState {
        *self.state.lock().expect("engine state mutex poisoned")
    }

    fn set_state(&self, new: EngineState) {
        *self.state.lock().expect("engine state mutex poisoned") = new;
    }

    pub fn set_gains(&self, gain_ref: f32, gain_voc: f32) {
        self.shared.gain_ref_bits.store(gain_ref.to_bits(), Ordering::SeqCst);
        self.shared.gain_voc_bits.store(gain_voc.to_bits(), Ordering::SeqCst);
    }

    pub fn set_vocal_offset(&self, frames: i32) {
        self.shared.voc_offset_frames.store(frames, Ordering::SeqCst);
    }

    pub fn ring_overflow_count(&self) -> u32 {
        self.shared.ring_overflow_count.load(Ordering::Relaxed)
    }

    /// Clears the rings, resets gains to (1.0, 0.0) and vocOffset to 0,
    /// advances the session id, and stores sessionStartFrame=playFrame.
    pub fn prepare_for_record(&self) -> Result<(), EngineError> {
        if matches!(self.state(), EngineState::Running(_)) {
            return Err(EngineError::InvalidState("cannot prepare while running"));
        }
        self.meta_ring.clear();
        self.pcm_ring.clear();
        self.input_feed.clear();
        self.set_gains(1.0, 0.0);
        self.set_vocal_offset(0);
        self.session
            .reset_for_start(self.shared.play_frame.load(Ordering::SeqCst));
        self.set_state(EngineState::Prepared(Mode::Record));
        Ok(())
    }

    /// Resets playFrame to 0; preserves gains and vocOffset.
    pub fn prepare_for_review(&self) -> Result<(), EngineError> {
        if matches!(self.state(), EngineState::Running(_)) {
            return Err(EngineError::InvalidState("cannot prepare while running"));
        }
        self.shared.play_frame.store(0, Ordering::SeqCst);
        self.set_state(EngineState::Prepared(Mode::Review));
        Ok(())
    }

    fn ensure_not_running(&self) -> Result<(), EngineError> {
        if matches!(self.state(), EngineState::Running(_)) {
            return Err(EngineError::InvalidState(
                "load not permitted while stream is running",
            ));
        }
        Ok(())
    }

    pub fn load_reference_bytes(&self, bytes: &[u8]) -> Result<(), EngineError> {
        self.ensure_not_running()?;
        self.track_store
            .load_reference_bytes(bytes, self.shared.engine_sample_rate.load(Ordering::SeqCst))
    }

    pub fn load_reference_path<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), EngineError> {
        self.ensure_not_running()?;
        self.track_store
            .load_reference_path(path, self.shared.engine_sample_rate.load(Ordering::SeqCst))
    }

    pub fn load_vocal_bytes(&self, bytes: &[u8]) -> Result<(), EngineError> {
        self.ensure_not_running()?;
        self.track_store
            .load_vocal_bytes(bytes, self.shared.engine_sample_rate.load(Ordering::SeqCst))
    }

    pub fn load_vocal_path<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), EngineError> {
        self.ensure_not_running()?;
        self.track_store
            .load_vocal_path(path, self.shared.engine_sample_rate.load(Ordering::SeqCst))
    }

    /// Opens input+output streams and starts the dispatcher worker.
    ///
    /// The negotiated output sample rate becomes the engine's rate; if it
    /// differs from `sample_rate`, subsequent `load_*` calls resample to
    /// the negotiated rate, not the originally requested one (documented
    /// open-question resolution; see `DESIGN.md`).
    pub fn start_duplex(&self, sample_rate: u32, channels: u16) -> Result<(), EngineError> {
        if self.state() != EngineState::Prepared(Mode::Record) {
            return Err(EngineError::InvalidState(
                "start_duplex requires prepare_for_record first",
            ));
        }

        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or_else(|| EngineError::StreamOpenFailure("no default input device".into()))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| EngineError::StreamOpenFailure("no default output device".into()))?;

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        self.shared.engine_sample_rate.store(sample_rate, Ordering::SeqCst);

        let input_feed = self.input_feed.clone();
        let input_stream = input_device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut bytes = Vec::with_capacity(data.len() * 4);
                    for s in data {
                        bytes.extend_from_slice(&s.to_le_bytes());
                    }
                    if !input_feed.push(&bytes) {
                        warn!("input feed ring overflow, samples dropped");
                    }
                },
                |err| error!("input stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::StreamOpenFailure(e.to_string()))?;

        let output_stream = self.build_record_output_stream(&output_device, &config, channels)?;

        // Streams must be confirmed running before the dispatcher is
        // spawned: if either `.play()` fails, returning early here would
        // otherwise leave a dispatcher thread draining `meta_ring`/
        // `pcm_ring` with nothing to stop it, and a retried `start_duplex`
        // would spawn a second consumer on the same rings.
        input_stream
            .play()
            .map_err(|e| EngineError::StreamOpenFailure(e.to_string()))?;
        output_stream
            .play()
            .map_err(|e| EngineError::StreamOpenFailure(e.to_string()))?;

        let sink = self
            .capture_sink
            .lock()
            .expect("capture sink mutex poisoned")
            .clone();
        let dispatcher = CaptureDispatcher::start(
            self.meta_ring.clone(),
            self.pcm_ring.clone(),
            sink,
            self.dispatcher_poll_interval,
        );
        *self.dispatcher.lock().expect("dispatcher mutex poisoned") = Some(dispatcher);

        *self.input_stream.lock().expect("input stream mutex poisoned") = Some(input_stream);
        *self.output_stream.lock().expect("output stream mutex poisoned") = Some(output_stream);
        self.transport
            .set_playback_start_frame(self.shared.play_frame.load(Ordering::SeqCst));
        self.set_state(EngineState::Running(Mode::Record));
        info!("duplex record stream started at {sample_rate} Hz, {channels} ch");
        Ok(())
    }

    fn build_record_output_stream(
        &self,
        output_device: &cpal::Device,
        config: &StreamConfig,
        channels: u16,
    ) -> Result<Stream, EngineError> {
        let shared = self.shared.clone();
        let session = self.session.clone();
        let track_store = self.track_store.clone();
        let transport = self.transport.clone();
        let input_feed = self.input_feed.clone();
        let meta_ring = self.meta_ring.clone();
        let pcm_ring = self.pcm_ring.clone();
        let channels_usize = channels as usize;

        let mut input_scratch = vec![0.0f32; channels_usize * SCRATCH_FRAMES];
        let mut input_bytes_scratch = vec![0u8; channels_usize * SCRATCH_FRAMES * 4];

        output_device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let num_frames = data.len() / channels_usize;
                    let capture_base = shared.play_frame.load(Ordering::SeqCst);

                    let needed_bytes = num_frames * channels_usize * 4;
                    if input_bytes_scratch.len() < needed_bytes {
                        input_bytes_scratch.resize(needed_bytes, 0);
                        input_scratch.resize(num_frames * channels_usize, 0.0);
                    }

                    // Zero-timeout read: pop whatever is already queued,
                    // never block waiting for the input callback to catch up.
                    let available = input_feed.size();
                    let to_read = available.min(needed_bytes);
                    let got_bytes = input_feed.pop(&mut input_bytes_scratch[..to_read]);
                    let got_frames = got_bytes / (channels_usize * 4);

                    for i in 0..got_frames * channels_usize {
                        let off = i * 4;
                        input_scratch[i] = f32::from_le_bytes([
                            input_bytes_scratch[off],
                            input_bytes_scratch[off + 1],
                            input_bytes_scratch[off + 2],
                            input_bytes_scratch[off + 3],
                        ]);
                    }

                    if got_frames > 0 {
                        let pcm16 = downmix_chunk_to_pcm16(
                            &input_scratch[..got_frames * channels_usize],
                            channels,
                        );

                        if transport.is_recording() {
                            transport.write_frame(&pcm16, capture_base);
                        }

                        let pcm_bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
                        let meta = CaptureMeta {
                            num_frames: got_frames as i32,
                            sample_rate: shared.engine_sample_rate.load(Ordering::SeqCst) as i32,
                            channels: 1,
                            input_frame_pos: capture_base,
                            output_frame_pos: capture_base,
                            timestamp_nanos: 0,
                            output_frame_pos_rel: capture_base - session.session_start_frame(),
                            session_id: session.session_id(),
                        };

                        // Both pushes must succeed as a pair: size-check
                        // before pushing either, so the rings never
                        // diverge past this single iteration.
                        if pcm_ring.capacity() - pcm_ring.size() >= pcm_bytes.len()
                            && meta_ring.capacity() - meta_ring.size() >= CAPTURE_META_SIZE
                        {
                            meta_ring.push(&meta.to_bytes());
                            pcm_ring.push(&pcm_bytes);
                        } else {
                            shared.ring_overflow_count.fetch_add(1, Ordering::Relaxed);
                        }

                        session.on_first_capture_if_needed(capture_base);
                    }

                    let gain_ref = shared.gain_ref();
                    track_store.with_tracks(|reference, _vocal| {
                        for frame in 0..num_frames {
                            let t = capture_base + frame as i64;
                            for ch in 0..channels_usize {
                                data[frame * channels_usize + ch] = reference.sample_at(t, ch as u16) * gain_ref;
                            }
                        }
                    });

                    shared
                        .play_frame
                        .store(capture_base + num_frames as i64, Ordering::SeqCst);
                    shared
                        .last_output_frame
                        .store(capture_base + num_frames as i64, Ordering::SeqCst);
                },
                |err| error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::StreamOpenFailure(e.to_string()))
    }

    pub fn start_playback_two_track(&self) -> Result<(), EngineError> {
        if self.state() != EngineState::Prepared(Mode::Review) {
            return Err(EngineError::InvalidState(
                "start_playback_two_track requires prepare_for_review first",
            ));
        }

        let host = cpal::default_host();
        let output_device = host
            .default_output_device()
            .ok_or_else(|| EngineError::StreamOpenFailure("no default output device".into()))?;

        let sample_rate = self.shared.engine_sample_rate.load(Ordering::SeqCst);
        let channels = self.track_store.reference_channels().max(1);
        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let shared = self.shared.clone();
        let track_store = self.track_store.clone();
        let channels_usize = channels as usize;

        let output_stream = output_device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let num_frames = data.len() / channels_usize;
                    let pf = shared.play_frame.load(Ordering::SeqCst);
                    let gain_ref = shared.gain_ref();
                    let gain_voc = shared.gain_voc();
                    let offset = shared.voc_offset_frames.load(Ordering::SeqCst);

                    track_store.with_tracks(|reference, vocal| {
                        for frame in 0..num_frames {
                            let t = pf + frame as i64;
                            for ch in 0..channels_usize {
                                data[frame * channels_usize + ch] =
                                    mix_channel_sample(reference, vocal, gain_ref, gain_voc, offset, t, ch as u16);
                            }
                        }
                    });

                    shared.play_frame.store(pf + num_frames as i64, Ordering::SeqCst);
                    shared
                        .last_output_frame
                        .store(pf + num_frames as i64, Ordering::SeqCst);
                },
                |err| error!("output stream error: {err}"),
                None,
            )
            .map_err(|e| EngineError::StreamOpenFailure(e.to_string()))?;

        output_stream
            .play()
            .map_err(|e| EngineError::StreamOpenFailure(e.to_string()))?;
        *self.output_stream.lock().expect("output stream mutex poisoned") = Some(output_stream);
        self.transport
            .set_playback_start_frame(self.shared.play_frame.load(Ordering::SeqCst));
        self.set_state(EngineState::Running(Mode::Review));
        info!("playback review stream started at {sample_rate} Hz, {channels} ch");
        Ok(())
    }

    /// Idempotent: stops streams, joins the worker, clears rings, closes
    /// the transport file.
    pub fn stop(&self) -> Result<(), EngineError> {
        if matches!(self.state(), EngineState::Uninitialized | EngineState::Stopped) {
            return Ok(());
        }

        self.input_stream.lock().expect("input stream mutex poisoned").take();
        self.output_stream.lock().expect("output stream mutex poisoned").take();

        if let Some(dispatcher) = self.dispatcher.lock().expect("dispatcher mutex poisoned").take() {
            dispatcher.stop();
        }

        if self.transport.is_recording() {
            if let Err(e) = self.transport.close() {
                error!("transport close failed during stop: {e}");
            }
        }

        self.meta_ring.clear();
        self.pcm_ring.clear();
        self.input_feed.clear();

        self.set_state(EngineState::Stopped);
        Ok(())
    }

    pub fn open_transport_record_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), EngineError> {
        if self.state() != EngineState::Running(Mode::Record) {
            return Err(EngineError::InvalidState(
                "transport recording requires a running duplex stream",
            ));
        }
        self.transport
            .open(path, 1, self.shared.engine_sample_rate.load(Ordering::SeqCst))
    }

    pub fn stop_transport_recording(&self) -> Result<(), EngineError> {
        self.transport.close()
    }

    pub fn session_snapshot(&self) -> EngineSnapshot {
        let s = self.session.snapshot();
        EngineSnapshot {
            session_id: s.session_id,
            session_start_frame: s.session_start_frame,
            first_capture_output_frame: s.first_capture_output_frame,
            last_output_frame: self.shared.last_output_frame.load(Ordering::SeqCst),
            computed_voc_offset_frames: s.computed_voc_offset_frames,
            has_first_capture: s.has_first_capture,
        }
    }

    pub fn playback_start_sample_time(&self) -> i64 {
        self.transport.playback_start_frame()
    }

    pub fn record_start_sample_time(&self) -> i64 {
        self.transport.record_start_frame()
    }

    pub fn record_bytes(&self) -> u64 {
        self.transport.record_bytes()
    }

    pub fn record_peak(&self) -> f32 {
        self.transport.peak()
    }

    #[cfg(test)]
    fn play_frame(&self) -> i64 {
        self.shared.play_frame.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn gain_ref(&self) -> f32 {
        self.shared.gain_ref()
    }

    #[cfg(test)]
    fn gain_voc(&self) -> f32 {
        self.shared.gain_voc()
    }

    #[cfg(test)]
    fn voc_offset(&self) -> i32 {
        self.shared.voc_offset_frames.load(Ordering::SeqCst)
    }
}
