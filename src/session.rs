//! Session identity and the first-capture vocal-offset computation.
//!
//! All fields are atomics; there is no lock.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};

pub struct SessionState {
    session_id: AtomicI32,
    session_start_frame: AtomicI64,
    first_capture_output_frame: AtomicI64,
    has_first_capture: AtomicBool,
    computed_voc_offset_frames: AtomicI32,
}

/// One logical read of every field. Individual atomics are loaded in a
/// fixed order; no cross-field linearization is guaranteed — callers
/// should treat this as advisory, not a linearizable transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session_id: i32,
    pub session_start_frame: i64,
    pub first_capture_output_frame: i64,
    pub computed_voc_offset_frames: i32,
    pub has_first_capture: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            session_id: AtomicI32::new(0),
            session_start_frame: AtomicI64::new(0),
            first_capture_output_frame: AtomicI64::new(-1),
            has_first_capture: AtomicBool::new(false),
            computed_voc_offset_frames: AtomicI32::new(0),
        }
    }

    /// Begin a new session: bump `sessionId`, anchor `sessionStartFrame`,
    /// and clear the first-capture bookkeeping.
    pub fn reset_for_start(&self, start_frame: i64) {
        self.session_id.fetch_add(1, Ordering::SeqCst);
        self.session_start_frame.store(start_frame, Ordering::SeqCst);
        self.first_capture_output_frame.store(-1, Ordering::SeqCst);
        self.has_first_capture.store(false, Ordering::SeqCst);
        self.computed_voc_offset_frames.store(0, Ordering::SeqCst);
    }

    /// Called from the realtime callback once per captured chunk. Only the
    /// first call in a session (the CAS winner) records the offset.
    pub fn on_first_capture_if_needed(&self, capture_base: i64) {
        if self
            .has_first_capture
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.first_capture_output_frame
                .store(capture_base, Ordering::SeqCst);
            let offset = (capture_base - self.session_start_frame.load(Ordering::SeqCst)) as i32;
            self.computed_voc_offset_frames.store(offset, Ordering::SeqCst);
        }
    }

    pub fn session_id(&self) -> i32 {
        self.session_id.load(Ordering::SeqCst)
    }

    pub fn session_start_frame(&self) -> i64 {
        self.session_start_frame.load(Ordering::SeqCst)
    }

    pub fn computed_voc_offset_frames(&self) -> i32 {
        self.computed_voc_offset_frames.load(Ordering::SeqCst)
    }

    pub fn has_first_capture(&self) -> bool {
        self.has_first_capture.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.load(Ordering::SeqCst),
            session_start_frame: self.session_start_frame.load(Ordering::SeqCst),
            first_capture_output_frame: self.first_capture_output_frame.load(Ordering::SeqCst),
            computed_voc_offset_frames: self.computed_voc_offset_frames.load(Ordering::SeqCst),
            has_first_capture: self.has_first_capture.load(Ordering::SeqCst),
        }
    }
}
