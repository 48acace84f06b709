//! Device-side event tracing.
//!
//! Every notable scheduler boundary appends a bounded event record to a
//! per-device ring buffer indexed by a single atomic counter. The tracer
//! is best-effort: overflow silently wraps, and the host drains the
//! buffer between runs.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Default ring capacity, in records.
pub const TRACE_CAPACITY: usize = 1 << 16;

/// Tag of one device trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TraceEvent {
    /// Start-of-run marker emitted by block 0 during init.
    Calibration = 0,

    /// A leader initialized and published a node's counters.
    NodeStart = 1,

    /// The retirer drained a node's remaining count.
    NodeFinish = 2,

    /// A block (or warp set) acquired its first claim on a node.
    BlockStart = 3,

    /// A block or warp reached completion accounting.
    BlockWait = 4,

    /// A block observed Exit and left the megakernel loop.
    BlockExit = 5,
}

impl TraceEvent {
    fn from_u32(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => TraceEvent::Calibration,
            1 => TraceEvent::NodeStart,
            2 => TraceEvent::NodeFinish,
            3 => TraceEvent::BlockStart,
            4 => TraceEvent::BlockWait,
            5 => TraceEvent::BlockExit,
            _ => return None,
        })
    }
}

/// One drained trace record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    /// Event tag.
    pub event: TraceEvent,

    /// Function id of the node involved, when applicable.
    pub func_id: u32,

    /// Event-specific payload: a claim offset or an invocation count.
    pub arg: u32,

    /// Index of the node involved, when applicable.
    pub node_idx: u32,
}

struct TraceSlot {
    // event | func_id packed high/low.
    head: AtomicU64,
    // arg | node_idx packed high/low.
    tail: AtomicU64,
}

/// Bounded per-device trace ring.
pub struct DeviceTracing {
    index: AtomicU32,
    slots: Box<[TraceSlot]>,
}

impl Default for DeviceTracing {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTracing {
    /// Creates a ring with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(TRACE_CAPACITY)
    }

    /// Creates a ring holding `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| TraceSlot {
                head: AtomicU64::new(0),
                tail: AtomicU64::new(0),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            index: AtomicU32::new(0),
            slots,
        }
    }

    /// Resets the write index for a new run.
    pub fn reset(&self) {
        self.index.store(0, Ordering::Relaxed);
    }

    /// Appends one record. Wraps silently when the ring is full.
    pub fn log(&self, event: TraceEvent, func_id: u32, arg: u32, node_idx: u32) {
        let at = self.index.fetch_add(1, Ordering::Relaxed) as usize;
        let slot = &self.slots[at % self.slots.len()];
        slot.head.store(
            ((event as u64) << 32) | func_id as u64,
            Ordering::Relaxed,
        );
        slot.tail
            .store(((arg as u64) << 32) | node_idx as u64, Ordering::Relaxed);
    }

    /// Number of records appended since the last reset (may exceed the
    /// ring capacity when wrapped).
    pub fn len(&self) -> usize {
        self.index.load(Ordering::Relaxed) as usize
    }

    /// Returns `true` if no records were appended since the last reset.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the ring into append order.
    ///
    /// When the ring wrapped, only the most recent `capacity` records
    /// survive. Call between runs; records written concurrently with the
    /// drain may be torn and are the caller's risk.
    pub fn drain(&self) -> Vec<TraceRecord> {
        let appended = self.index.load(Ordering::Relaxed) as usize;
        let capacity = self.slots.len();
        let kept = appended.min(capacity);
        let start = appended - kept;

        let mut records = Vec::with_capacity(kept);
        for i in start..appended {
            let slot = &self.slots[i % capacity];
            let head = slot.head.load(Ordering::Relaxed);
            let tail = slot.tail.load(Ordering::Relaxed);

            let Some(event) = TraceEvent::from_u32((head >> 32) as u32) else {
                continue;
            };
            records.push(TraceRecord {
                event,
                func_id: head as u32,
                arg: (tail >> 32) as u32,
                node_idx: tail as u32,
            });
        }
        records
    }
}
