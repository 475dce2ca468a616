//! Single-producer / single-consumer byte ring buffer.
//!
//! Used twice by the duplex engine: one ring carries raw PCM16 capture
//! bytes, a parallel ring carries fixed-size [`crate::capture::CaptureMeta`]
//! records. The realtime callback is the sole producer; the
//! [`crate::capture::CaptureDispatcher`] worker thread is the sole consumer.
//! Capacity is one byte less than the allocation so a full ring and an
//! empty ring never share a cursor state.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free SPSC byte ring with acquire/release cursor discipline.
///
/// # Safety
/// Callers must guarantee a single producer thread calls [`ByteRing::push`]
/// and a single consumer thread calls [`ByteRing::pop`]/[`ByteRing::peek`].
/// `clear` must only be called when neither side is concurrently active
/// (the engine only calls it during `stop`).
pub struct ByteRing {
    buf: UnsafeCell<Box<[u8]>>,
    // allocated length; usable capacity is `len - 1`
    len: usize,
    head: AtomicUsize,
    tail: AtomicUsize,
}

// SAFETY: exclusive producer/consumer access to `buf` is enforced by the
// head/tail atomics below, following the standard SPSC ring discipline:
// the producer only writes bytes behind `head` that the consumer has
// already released past `tail`, and vice versa.
unsafe impl Send for ByteRing {}
unsafe impl Sync for ByteRing {}

impl ByteRing {
    /// `capacity` is the number of bytes that can be held at once; the
    /// backing allocation is one byte larger.
    pub fn new(capacity: usize) -> Self {
        let len = capacity + 1;
        Self {
            buf: UnsafeCell::new(vec![0u8; len].into_boxed_slice()),
            len,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Bytes the ring can hold at once.
    pub fn capacity(&self) -> usize {
        self.len - 1
    }

    /// Occupied byte count. Safe to call from either side.
    pub fn size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.occupied(head, tail)
    }

    fn occupied(&self, head: usize, tail: usize) -> usize {
        if head >= tail {
            head - tail
        } else {
            self.len - tail + head
        }
    }

    /// Producer side. Fails without writing anything if `src` does not fit.
    pub fn push(&self, src: &[u8]) -> bool {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let free = self.capacity() - self.occupied(head, tail);
        if src.len() > free {
            return false;
        }

        // SAFETY: sole producer; the consumer never touches bytes at or
        // ahead of `head` until this store publishes them.
        let buf = unsafe { &mut *self.buf.get() };
        let first = (self.len - head).min(src.len());
        buf[head..head + first].copy_from_slice(&src[..first]);
        if first < src.len() {
            let rest = src.len() - first;
            buf[..rest].copy_from_slice(&src[first..]);
        }

        let new_head = (head + src.len()) % self.len;
        self.head.store(new_head, Ordering::Release);
        true
    }

    /// Read without advancing the consumer cursor. Returns `false` if fewer
    /// than `out.len()` bytes are available, leaving `out` untouched.
    pub fn peek(&self, out: &mut [u8]) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if self.occupied(head, tail) < out.len() {
            return false;
        }

        // SAFETY: sole consumer; only reads bytes published by the producer
        // (behind `head`, acquired above).
        let buf = unsafe { &*self.buf.get() };
        let first = (self.len - tail).min(out.len());
        out[..first].copy_from_slice(&buf[tail..tail + first]);
        if first < out.len() {
            let rest = out.len() - first;
            out[first..].copy_from_slice(&buf[..rest]);
        }
        true
    }

    /// Copy up to `out.len()` bytes out, advancing the consumer cursor by
    /// the number of bytes actually copied. Returns that count.
    pub fn pop(&self, out: &mut [u8]) -> usize {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let avail = self.occupied(head, tail);
        let n = avail.min(out.len());
        if n == 0 {
            return 0;
        }

        let buf = unsafe { &*self.buf.get() };
        let first = (self.len - tail).min(n);
        out[..first].copy_from_slice(&buf[tail..tail + first]);
        if first < n {
            let rest = n - first;
            out[first..n].copy_from_slice(&buf[..rest]);
        }

        let new_tail = (tail + n) % self.len;
        self.tail.store(new_tail, Ordering::Release);
        n
    }

    /// Reset both cursors to empty. Only safe with no concurrent producer
    /// or consumer activity (called from `stop`).
    pub fn clear(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_round_trip() {
        let ring = ByteRing::new(16);
        assert!(ring.push(b"hello"));
        assert_eq!(ring.size(), 5);

        let mut out = [0u8; 5];
        assert_eq!(ring.pop(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn push_fails_when_full() {
        let ring = ByteRing::new(4);
        assert!(ring.push(&[1, 2, 3, 4]));
        assert!(!ring.push(&[5]));
        assert_eq!(ring.size(), 4);
    }

    #[test]
    fn peek_does_not_advance() {
        let ring = ByteRing::new(8);
        ring.push(&[1, 2, 3]);

        let mut out = [0u8; 3];
        assert!(ring.peek(&mut out));
        assert_eq!(out, [1, 2, 3]);
        assert_eq!(ring.size(), 3); // unchanged

        assert_eq!(ring.pop(&mut out), 3);
        assert_eq!(ring.size(), 0);
    }

    #[test]
    fn peek_insufficient_data_leaves_state_untouched() {
        let ring = ByteRing::new(8);
        ring.push(&[1, 2]);

        let mut out = [0u8; 4];
        assert!(!ring.peek(&mut out));
        assert_eq!(ring.size(), 2);
    }

    #[test]
    fn wraparound_preserves_order() {
        let ring = ByteRing::new(4);
        assert!(ring.push(&[1, 2, 3]));
        let mut out = [0u8; 2];
        assert_eq!(ring.pop(&mut out), 2);
        assert_eq!(out, [1, 2]);

        // head is now at 3, tail at 2; pushing 3 more bytes wraps around
        assert!(ring.push(&[4, 5, 6]));
        let mut out = [0u8; 4];
        assert_eq!(ring.pop(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn clear_resets_cursors() {
        let ring = ByteRing::new(8);
        ring.push(&[1, 2, 3]);
        ring.clear();
        assert_eq!(ring.size(), 0);
        assert!(ring.push(&[9, 9, 9, 9, 9, 9, 9, 9]));
    }

    #[test]
    fn randomized_spsc_sequence_matches() {
        use std::sync::Arc;
        use std::thread;

        let ring = Arc::new(ByteRing::new(97));
        let producer = ring.clone();

        let mut expected = Vec::new();
        let mut seed = 12345u64;
        let mut next = || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            (seed >> 33) as u32
        };
        let payloads: Vec<Vec<u8>> = (0..500)
            .map(|_| {
                let len = 1 + (next() % 23) as usize;
                (0..len).map(|_| (next() % 256) as u8).collect()
            })
            .collect();
        for p in &payloads {
            expected.extend_from_slice(p);
        }

        let payloads_for_producer = payloads.clone();
        let handle = thread::spawn(move || {
            for p in payloads_for_producer {
                loop {
                    if producer.push(&p) {
                        break;
                    }
                    thread::yield_now();
                }
            }
        });

        let mut received = Vec::new();
        let mut scratch = vec![0u8; 23];
        while received.len() < expected.len() {
            let n = ring.pop(&mut scratch);
            received.extend_from_slice(&scratch[..n]);
            if n == 0 {
                thread::yield_now();
            }
        }

        handle.join().unwrap();
        assert_eq!(received, expected);
    }
}
