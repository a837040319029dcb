//! Lock-free jitter ring buffer for received audio packets
//!
//! This implements a single-producer single-consumer (SPSC) ring of
//! pre-allocated packet slots. The network receiver owns the write cursor
//! (tail) and the audio callback owns the read cursor (head). Neither side
//! ever blocks: a full buffer rejects the newest packet, an empty buffer
//! reports an underrun and hands back silence.
//!
//! Ownership of the two cursors is enforced by [`JitterRingBuffer::split`],
//! which consumes the buffer and returns exactly one [`RingProducer`] and one
//! [`RingConsumer`]. Read-only views for telemetry are available through
//! [`RingMonitor`].

use crossbeam::utils::CachePadded;
use serde::Serialize;
use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// One received packet: interleaved 16-bit samples for `channels` channels
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketFrame {
    /// Interleaved samples, already converted to native endianness
    pub samples: Vec<i16>,
    /// Number of channels
    pub channels: u16,
    /// RTP media timestamp
    pub timestamp: u32,
    /// Extended (rollover-free) sequence number
    pub sequence: u64,
}

impl PacketFrame {
    pub fn new(samples: Vec<i16>, channels: u16, timestamp: u32, sequence: u64) -> Self {
        Self {
            samples,
            channels,
            timestamp,
            sequence,
        }
    }

    /// Empty frame with room for `max_frames` frames, so later copies into it
    /// never allocate
    pub fn with_capacity(channels: u16, max_frames: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_frames * channels as usize),
            channels,
            timestamp: 0,
            sequence: 0,
        }
    }

    /// Number of audio frames (samples per channel)
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Zero every sample in place, keeping the length
    pub fn silence(&mut self) {
        self.samples.fill(0);
    }

    /// Copy `other` into `self`, reusing the existing allocation
    fn copy_from(&mut self, other: &PacketFrame) {
        self.samples.clear();
        self.samples.extend_from_slice(&other.samples);
        self.channels = other.channels;
        self.timestamp = other.timestamp;
        self.sequence = other.sequence;
    }
}

/// Cursor movement counters.
///
/// `*_requests` count every call, `*_moves` only the calls that changed the
/// buffer. The difference is the number of rejected enqueues (full) or
/// empty dequeues. A request is always counted before its move, so a
/// snapshot that loads moves first never sees more moves than requests.
#[derive(Debug, Default)]
struct RingStats {
    head_move_requests: AtomicU64,
    head_moves: AtomicU64,
    tail_move_requests: AtomicU64,
    tail_moves: AtomicU64,
}

/// Point-in-time copy of the cursor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RingStatsSnapshot {
    pub head_move_requests: u64,
    pub head_moves: u64,
    pub tail_move_requests: u64,
    pub tail_moves: u64,
}

impl RingStatsSnapshot {
    /// Enqueues rejected because the buffer was full
    pub fn overflows(&self) -> u64 {
        self.tail_move_requests.saturating_sub(self.tail_moves)
    }

    /// Dequeues that found the buffer empty
    pub fn empty_reads(&self) -> u64 {
        self.head_move_requests.saturating_sub(self.head_moves)
    }
}

/// Fixed-capacity SPSC ring of packet slots
pub struct JitterRingBuffer {
    slots: Box<[UnsafeCell<PacketFrame>]>,
    /// Next slot to read. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next slot to write. Written only by the producer.
    tail: CachePadded<AtomicUsize>,
    /// Published slots. Incremented by the producer after a slot is written,
    /// decremented by the consumer after a slot is read.
    occupancy: CachePadded<AtomicUsize>,
    stats: RingStats,
}

// SAFETY: slot contents are only accessed through `RingProducer` (slot at
// tail, only while occupancy < capacity) and `RingConsumer` (slot at head,
// only while occupancy > 0). The occupancy counter's release/acquire pairs
// order every slot write before the matching read and every read before the
// slot is reused. `split` hands out exactly one of each handle.
unsafe impl Sync for JitterRingBuffer {}

impl JitterRingBuffer {
    /// Create a buffer of `capacity` slots, each pre-allocated for
    /// `slot_samples` interleaved samples.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn new(capacity: usize, slot_samples: usize) -> Self {
        assert!(capacity > 0, "Capacity must be non-zero");

        let slots = (0..capacity)
            .map(|_| {
                UnsafeCell::new(PacketFrame {
                    samples: Vec::with_capacity(slot_samples),
                    ..Default::default()
                })
            })
            .collect();

        Self {
            slots,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            occupancy: CachePadded::new(AtomicUsize::new(0)),
            stats: RingStats::default(),
        }
    }

    /// Hand out the single producer and single consumer
    pub fn split(self) -> (RingProducer, RingConsumer) {
        let ring = Arc::new(self);
        (
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        )
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots written but not yet read
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Acquire)
    }

    pub fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    pub fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.capacity()
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.occupancy() as f32 / self.capacity() as f32
    }

    pub fn stats(&self) -> RingStatsSnapshot {
        let head_moves = self.stats.head_moves.load(Ordering::Acquire);
        let tail_moves = self.stats.tail_moves.load(Ordering::Acquire);
        RingStatsSnapshot {
            head_move_requests: self.stats.head_move_requests.load(Ordering::Acquire),
            head_moves,
            tail_move_requests: self.stats.tail_move_requests.load(Ordering::Acquire),
            tail_moves,
        }
    }

    fn advance(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity() {
            0
        } else {
            next
        }
    }
}

/// Write side of the ring. Owned by the network receiver.
pub struct RingProducer {
    ring: Arc<JitterRingBuffer>,
}

impl RingProducer {
    /// Move `frame` into the slot at the tail.
    ///
    /// Returns false and drops `frame` when the buffer is full. The oldest
    /// unread packet is never overwritten.
    pub fn try_enqueue(&mut self, frame: PacketFrame) -> bool {
        self.try_enqueue_with(|slot| *slot = frame)
    }

    /// Fill the slot at the tail in place, then publish it.
    ///
    /// `fill` is only called when a slot is free. The slot still holds the
    /// previous packet's data and allocation; `fill` is expected to overwrite
    /// every field it cares about.
    pub fn try_enqueue_with<F>(&mut self, fill: F) -> bool
    where
        F: FnOnce(&mut PacketFrame),
    {
        let ring = &*self.ring;
        ring.stats.tail_move_requests.fetch_add(1, Ordering::Release);

        if ring.occupancy.load(Ordering::Acquire) >= ring.capacity() {
            return false;
        }

        let tail = ring.tail.load(Ordering::Relaxed);
        // SAFETY: we are the only producer, and occupancy < capacity means
        // the consumer has finished with this slot (acquire above).
        let slot = unsafe { &mut *ring.slots[tail].get() };
        fill(slot);

        ring.tail.store(ring.advance(tail), Ordering::Release);
        ring.occupancy.fetch_add(1, Ordering::Release);
        ring.stats.tail_moves.fetch_add(1, Ordering::Release);
        true
    }

    pub fn monitor(&self) -> RingMonitor {
        RingMonitor {
            ring: self.ring.clone(),
        }
    }
}

impl Deref for RingProducer {
    type Target = JitterRingBuffer;

    fn deref(&self) -> &Self::Target {
        &self.ring
    }
}

/// Read side of the ring. Owned by the audio pull callback.
pub struct RingConsumer {
    ring: Arc<JitterRingBuffer>,
}

impl RingConsumer {
    /// Copy the packet at the head into `out` and release its slot.
    ///
    /// Returns false when the buffer is empty; `out` is then zeroed in place
    /// so the caller never plays stale samples. Never allocates as long as
    /// `out` has capacity for the largest packet.
    pub fn try_dequeue(&mut self, out: &mut PacketFrame) -> bool {
        let ring = &*self.ring;
        ring.stats.head_move_requests.fetch_add(1, Ordering::Release);

        if ring.occupancy.load(Ordering::Acquire) == 0 {
            out.silence();
            return false;
        }

        let head = ring.head.load(Ordering::Relaxed);
        // SAFETY: we are the only consumer, and occupancy > 0 means the
        // producer has published this slot (acquire above).
        let slot = unsafe { &*ring.slots[head].get() };
        out.copy_from(slot);

        ring.head.store(ring.advance(head), Ordering::Release);
        ring.occupancy.fetch_sub(1, Ordering::AcqRel);
        ring.stats.head_moves.fetch_add(1, Ordering::Release);
        true
    }

    pub fn monitor(&self) -> RingMonitor {
        RingMonitor {
            ring: self.ring.clone(),
        }
    }
}

impl Deref for RingConsumer {
    type Target = JitterRingBuffer;

    fn deref(&self) -> &Self::Target {
        &self.ring
    }
}

/// Read-only, cloneable view of a ring for telemetry pollers
#[derive(Clone)]
pub struct RingMonitor {
    ring: Arc<JitterRingBuffer>,
}

impl Deref for RingMonitor {
    type Target = JitterRingBuffer;

    fn deref(&self) -> &Self::Target {
        &self.ring
    }
}
