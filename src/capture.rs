//! Capture metadata layout, the host-facing sink trait, and the
//! background dispatcher that pairs metadata with PCM payload and hands
//! each packet to the host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::byte_ring::ByteRing;

/// Fixed-layout capture metadata record. Producer and consumer copy this
/// type to/from raw bytes by value — it is a realtime-path record, not a
/// wire format, so it is never routed through serde.
///
/// Fields are declared eight-byte ones first so natural `#[repr(C)]`
/// alignment packs them with no padding anywhere in the struct (4×8 + 4×4
/// = 48 bytes, itself a multiple of the struct's 8-byte alignment).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMeta {
    pub input_frame_pos: i64,
    pub output_frame_pos: i64,
    pub timestamp_nanos: i64,
    pub output_frame_pos_rel: i64,
    pub num_frames: i32,
    pub sample_rate: i32,
    pub channels: i32,
    pub session_id: i32,
}

pub const CAPTURE_META_SIZE: usize = std::mem::size_of::<CaptureMeta>();

impl CaptureMeta {
    pub fn to_bytes(self) -> [u8; CAPTURE_META_SIZE] {
        // SAFETY: CaptureMeta is #[repr(C)], plain-old-data, and sized
        // exactly CAPTURE_META_SIZE.
        unsafe { std::mem::transmute_copy(&self) }
    }

    pub fn from_bytes(bytes: [u8; CAPTURE_META_SIZE]) -> Self {
        // SAFETY: mirror of `to_bytes`; any bit pattern is a valid
        // CaptureMeta since every field is an integer type.
        unsafe { std::mem::transmute_copy(&bytes) }
    }
}

/// One delivered capture packet, handed to [`HostCaptureSink::on_captured`].
#[derive(Debug, Clone)]
pub struct CapturePacket {
    pub pcm16: Vec<u8>,
    pub meta: CaptureMeta,
}

/// Interface consumed by the dispatcher. The host is responsible for
/// dropping packets whose `session_id` does not match the session it is
/// currently observing.
pub trait HostCaptureSink: Send + Sync {
    fn on_captured(&self, packet: CapturePacket);
}

/// Counters the dispatcher and engine increment on drop paths; surfaced to
/// the host for diagnostics, never for control flow.
#[derive(Debug, Default)]
pub struct CaptureDiagnostics {
    pub ring_overflow_count: AtomicU64,
}

impl CaptureDiagnostics {
    pub fn record_overflow(&self) {
        self.ring_overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overflow_count(&self) -> u64 {
        self.ring_overflow_count.load(Ordering::Relaxed)
    }
}

/// Best-effort scheduling priority bump for the dispatcher thread.
/// Failure is logged, never propagated — the dispatcher runs fine at
/// normal priority, just with more jitter under load.
fn set_realtime_priority() {
    #[cfg(target_os = "linux")]
    {
        let result = unsafe {
            let param = libc::sched_param { sched_priority: 50 };
            libc::sched_setscheduler(0, libc::SCHED_FIFO, &param)
        };
        if result == 0 {
            debug!("capture dispatcher running at SCHED_FIFO priority 50");
        } else {
            warn!(
                "failed to set real-time scheduling for capture dispatcher: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(target_os = "macos")]
    {
        let result = unsafe {
            let thread = libc::pthread_self();
            let mut policy: i32 = 0;
            let mut param = libc::sched_param { sched_priority: 0 };
            if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
                param.sched_priority = 45;
                libc::pthread_setschedparam(thread, policy, &param)
            } else {
                -1
            }
        };
        if result == 0 {
            debug!("capture dispatcher running at elevated thread priority");
        } else {
            warn!(
                "failed to set thread priority for capture dispatcher: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        debug!("real-time scheduling not implemented on this platform");
    }
}

/// Background worker that drains the metadata and PCM rings.
///
/// Two-phase peek-then-pop is mandatory: a metadata record is only popped
/// once its matching PCM payload is fully available, so the two rings can
/// diverge by a few microseconds without the consumer ever mis-framing a
/// packet.
pub struct CaptureDispatcher {
    handle: Option<JoinHandle<()>>,
    wake: Arc<(Mutex<bool>, Condvar)>,
    running: Arc<std::sync::atomic::AtomicBool>,
}

impl CaptureDispatcher {
    /// `poll_interval` bounds how long the worker sleeps between drains when
    /// not explicitly woken by [`notify`](Self::notify); sourced from
    /// `EngineConfig`'s `rings.dispatcher_poll_interval_ms`.
    pub fn start(
        meta_ring: Arc<ByteRing>,
        pcm_ring: Arc<ByteRing>,
        sink: Arc<dyn HostCaptureSink>,
        poll_interval: Duration,
    ) -> Self {
        let wake = Arc::new((Mutex::new(false), Condvar::new()));
        let running = Arc::new(std::sync::atomic::AtomicBool::new(true));

        let wake_clone = wake.clone();
        let running_clone = running.clone();
        let handle = thread::spawn(move || {
            set_realtime_priority();
            Self::run(meta_ring, pcm_ring, sink, wake_clone, running_clone, poll_interval);
        });

        Self {
            handle: Some(handle),
            wake,
            running,
        }
    }

    /// Signal the worker to check the rings immediately rather than
    /// waiting out its timeout.
    pub fn notify(&self) {
        let (lock, cvar) = &*self.wake;
        let mut flag = lock.lock().expect("dispatcher wake mutex poisoned");
        *flag = true;
        cvar.notify_one();
    }

    fn run(
        meta_ring: Arc<ByteRing>,
        pcm_ring: Arc<ByteRing>,
        sink: Arc<dyn HostCaptureSink>,
        wake: Arc<(Mutex<bool>, Condvar)>,
        running: Arc<std::sync::atomic::AtomicBool>,
        poll_interval: Duration,
    ) {
        debug!("capture dispatcher started");
        while running.load(Ordering::Relaxed) {
            Self::drain(&meta_ring, &pcm_ring, &sink);

            let (lock, cvar) = &*wake;
            let flag = lock.lock().expect("dispatcher wake mutex poisoned");
            let (mut flag, _timeout) = cvar
                .wait_timeout(flag, poll_interval)
                .expect("dispatcher wake mutex poisoned");
            *flag = false;
        }

        // Drain whatever is left before exiting.
        Self::drain(&meta_ring, &pcm_ring, &sink);
        debug!("capture dispatcher stopped");
    }

    fn drain(meta_ring: &ByteRing, pcm_ring: &ByteRing, sink: &Arc<dyn HostCaptureSink>) {
        loop {
            let mut meta_bytes = [0u8; CAPTURE_META_SIZE];
            if !meta_ring.peek(&mut meta_bytes) {
                break;
            }
            let meta = CaptureMeta::from_bytes(meta_bytes);
            let pcm_len = meta.num_frames as usize * meta.channels as usize * 2;

            if pcm_ring.size() < pcm_len {
                // Metadata committed slightly ahead of its PCM payload;
                // wait for the next wake rather than mis-framing.
                break;
            }

            let mut popped_meta = [0u8; CAPTURE_META_SIZE];
            let n = meta_ring.pop(&mut popped_meta);
            debug_assert_eq!(n, CAPTURE_META_SIZE);

            let mut pcm16 = vec![0u8; pcm_len];
            let popped = pcm_ring.pop(&mut pcm16);
            debug_assert_eq!(popped, pcm_len);

            sink.on_captured(CapturePacket { pcm16, meta });
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.notify();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("capture dispatcher thread panicked: {:?}", e);
            }
        }
    }
}
