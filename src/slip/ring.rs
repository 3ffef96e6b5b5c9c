//! Fixed-capacity SLIP reassembly ring.
//!
//! One producer feeds raw wire bytes as they arrive; one consumer pulls out
//! complete frames. The two sides share a circular byte buffer through three
//! cursors:
//!
//! - `read`: first slot of the oldest undelivered frame. Consumer-owned.
//! - `seal`: one past the delimiter of the newest complete frame.
//!   Producer-owned.
//! - `write`: next free slot while a frame is still being assembled. Private
//!   to the producer, never shared.
//!
//! The consumer only ever sees `[read, seal)`, which by construction holds
//! whole delimited frames, so neither side needs a lock: each cursor has one
//! writer, `seal` is published with Release and observed with Acquire (and
//! `read` the same way in the opposite direction), and the byte cells are
//! plain atomics whose visibility rides on those cursor edges.
//!
//! Escape pairs are stored verbatim and resolved during drain, which keeps
//! [`ByteFeeder::feed_byte`] cheap enough for an interrupt-style caller. One
//! slot is always left unused so a full ring and an empty ring do not look
//! the same.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{FlowControl, END, ESC};

/// Smallest usable ring: a delimiter, a couple of escape pairs, and the
/// reserved slot.
pub const MIN_CAPACITY: usize = 8;

/// What the byte producer should do after feeding a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeHint {
    /// Nothing changed for the consumer; keep feeding.
    None,
    /// A frame was sealed; wake the consumer.
    FrameSealed,
    /// The ring is out of space and the in-progress frame was abandoned.
    /// Wake the consumer and stop feeding until it drains.
    BufferFull,
}

/// Receive-side decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Accumulating frame bytes.
    Normal,
    /// Saw ESC; holding it until the next byte validates the pair.
    Escape,
    /// Desynchronized; drop everything until the next delimiter.
    Discarding,
}

/// Snapshot of the ring's event counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Frames completed by the producer.
    pub frames_sealed: u64,
    /// Frames handed to the consumer.
    pub frames_delivered: u64,
    /// Times the ring ran out of space and abandoned an in-progress frame.
    pub overflows: u64,
    /// ESC followed by a byte that is not a valid marker.
    pub bad_escapes: u64,
    /// Bytes thrown away while hunting for the next delimiter.
    pub discarded_bytes: u64,
    /// Sealed frames dropped because the caller's buffer was too small.
    pub oversized_drops: u64,
}

struct Shared {
    cells: Box<[AtomicU8]>,
    read: AtomicUsize,
    seal: AtomicUsize,
    frames_sealed: AtomicU64,
    frames_delivered: AtomicU64,
    overflows: AtomicU64,
    bad_escapes: AtomicU64,
    discarded_bytes: AtomicU64,
    oversized_drops: AtomicU64,
}

impl Shared {
    fn stats(&self) -> RingStats {
        RingStats {
            frames_sealed: self.frames_sealed.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            bad_escapes: self.bad_escapes.load(Ordering::Relaxed),
            discarded_bytes: self.discarded_bytes.load(Ordering::Relaxed),
            oversized_drops: self.oversized_drops.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of the ring's counters, detachable from either half.
#[derive(Clone)]
pub struct StatsHandle {
    shared: Arc<Shared>,
}

impl StatsHandle {
    pub fn snapshot(&self) -> RingStats {
        self.shared.stats()
    }
}

/// Producer half: feeds one wire byte at a time.
pub struct ByteFeeder {
    shared: Arc<Shared>,
    flow: FlowControl,
    /// Next free slot. Only this half ever moves it.
    write: usize,
    state: DecodeState,
    on_frame_sealed: Option<Box<dyn Fn() + Send>>,
}

/// Consumer half: pulls out complete, unescaped frames.
pub struct FrameDrain {
    shared: Arc<Shared>,
    flow: FlowControl,
}

/// Create a ring of `capacity` byte slots and split it into its two halves.
///
/// The ring starts desynchronized: bytes are discarded until the first
/// delimiter, so attaching mid-stream never yields a torn frame.
///
/// # Panics
///
/// Panics when `capacity` is below [`MIN_CAPACITY`].
pub fn bounded(capacity: usize, flow: FlowControl) -> (ByteFeeder, FrameDrain) {
    assert!(
        capacity >= MIN_CAPACITY,
        "ring capacity {capacity} is below the minimum of {MIN_CAPACITY}"
    );
    let cells: Box<[AtomicU8]> = (0..capacity).map(|_| AtomicU8::new(0)).collect();
    let shared = Arc::new(Shared {
        cells,
        read: AtomicUsize::new(0),
        seal: AtomicUsize::new(0),
        frames_sealed: AtomicU64::new(0),
        frames_delivered: AtomicU64::new(0),
        overflows: AtomicU64::new(0),
        bad_escapes: AtomicU64::new(0),
        discarded_bytes: AtomicU64::new(0),
        oversized_drops: AtomicU64::new(0),
    });
    let feeder = ByteFeeder {
        shared: shared.clone(),
        flow,
        write: 0,
        state: DecodeState::Discarding,
        on_frame_sealed: None,
    };
    let drain = FrameDrain { shared, flow };
    (feeder, drain)
}

impl ByteFeeder {
    /// Feed one byte from the wire.
    ///
    /// Runs in bounded time and never allocates, so it is safe to call from
    /// wherever the bytes land first. The returned hint tells the caller
    /// whether to wake the consumer; on [`WakeHint::BufferFull`] the caller
    /// should also hold further input until the consumer has drained,
    /// otherwise everything up to the next delimiter is discarded.
    pub fn feed_byte(&mut self, byte: u8) -> WakeHint {
        match self.state {
            DecodeState::Discarding => {
                if byte == END {
                    self.state = DecodeState::Normal;
                } else {
                    self.shared.discarded_bytes.fetch_add(1, Ordering::Relaxed);
                }
                WakeHint::None
            }
            DecodeState::Escape => {
                if self.flow.resolve(byte).is_some() {
                    // Store the pair verbatim; the drain resolves it.
                    if !self.push(ESC) || !self.push(byte) {
                        return self.overflow();
                    }
                    self.state = DecodeState::Normal;
                    WakeHint::None
                } else {
                    // ESC followed by garbage: nothing in this frame can be
                    // trusted anymore.
                    self.shared.bad_escapes.fetch_add(1, Ordering::Relaxed);
                    self.rewind();
                    self.state = DecodeState::Discarding;
                    WakeHint::None
                }
            }
            DecodeState::Normal => {
                if byte == ESC {
                    self.state = DecodeState::Escape;
                    WakeHint::None
                } else if byte == END {
                    self.delimit()
                } else if self.push(byte) {
                    WakeHint::None
                } else {
                    self.overflow()
                }
            }
        }
    }

    /// Register a hook invoked once per sealed frame, in addition to the
    /// [`WakeHint::FrameSealed`] return. It runs on the feeding side, so it
    /// must be cheap and must not block.
    pub fn set_frame_ready_hook<F>(&mut self, hook: F)
    where
        F: Fn() + Send + 'static,
    {
        self.on_frame_sealed = Some(Box::new(hook));
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }

    /// Slots still available to the in-progress frame, not counting the
    /// reserved one.
    pub fn free_space(&self) -> usize {
        let cap = self.shared.cells.len();
        let read = self.shared.read.load(Ordering::Acquire);
        let occupied = (self.write + cap - read) % cap;
        cap - 1 - occupied
    }

    /// Append one raw slot. False when only the reserved slot is left.
    fn push(&mut self, byte: u8) -> bool {
        let cap = self.shared.cells.len();
        let next = (self.write + 1) % cap;
        if next == self.shared.read.load(Ordering::Acquire) {
            return false;
        }
        self.shared.cells[self.write].store(byte, Ordering::Relaxed);
        self.write = next;
        true
    }

    /// Handle a bare END in `Normal` state.
    fn delimit(&mut self) -> WakeHint {
        // Producer owns `seal`; a relaxed load of our own last store is fine.
        if self.write == self.shared.seal.load(Ordering::Relaxed) {
            // Back-to-back delimiters seal nothing.
            return WakeHint::None;
        }
        if !self.push(END) {
            return self.overflow();
        }
        self.shared.seal.store(self.write, Ordering::Release);
        self.shared.frames_sealed.fetch_add(1, Ordering::Relaxed);
        if let Some(hook) = &self.on_frame_sealed {
            hook();
        }
        WakeHint::FrameSealed
    }

    fn overflow(&mut self) -> WakeHint {
        self.shared.overflows.fetch_add(1, Ordering::Relaxed);
        self.rewind();
        self.state = DecodeState::Discarding;
        WakeHint::BufferFull
    }

    /// Abandon the in-progress frame. Sealed frames are untouched.
    fn rewind(&mut self) {
        self.write = self.shared.seal.load(Ordering::Relaxed);
    }
}

impl FrameDrain {
    /// Copy the oldest sealed frame into `out`, unescaped, and return its
    /// payload length. Returns 0 when no sealed frame is queued.
    ///
    /// A frame that does not fit `out` is dropped, counted, and replaced by
    /// the next queued frame in the same call, so 0 always means the ring is
    /// empty of frames. Never blocks; a consumer woken after
    /// [`WakeHint::FrameSealed`] should call this until it returns 0.
    pub fn drain_frame(&mut self, out: &mut [u8]) -> usize {
        loop {
            let seal = self.shared.seal.load(Ordering::Acquire);
            let mut pos = self.shared.read.load(Ordering::Relaxed);
            if pos == seal {
                return 0;
            }
            let cap = self.shared.cells.len();
            let mut len = 0;
            let mut pending_escape = false;
            let mut overrun = false;
            while pos != seal {
                let byte = self.shared.cells[pos].load(Ordering::Relaxed);
                pos = (pos + 1) % cap;
                if byte == END {
                    break;
                }
                let value = if pending_escape {
                    pending_escape = false;
                    // Pairs were validated before they were stored.
                    self.flow.resolve(byte).unwrap_or(byte)
                } else if byte == ESC {
                    pending_escape = true;
                    continue;
                } else {
                    byte
                };
                if len < out.len() {
                    out[len] = value;
                    len += 1;
                } else {
                    overrun = true;
                }
            }
            // Hand the consumed region back to the producer in one step.
            self.shared.read.store(pos, Ordering::Release);
            if overrun {
                self.shared.oversized_drops.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
            return len;
        }
    }

    /// Whether at least one sealed frame is waiting.
    pub fn has_frame(&self) -> bool {
        self.shared.read.load(Ordering::Relaxed) != self.shared.seal.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }

    pub fn stats_handle(&self) -> StatsHandle {
        StatsHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.cells.len()
    }
}
