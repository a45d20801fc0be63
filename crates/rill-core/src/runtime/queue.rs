//! Per-source queue state owned by the scheduler.
//!
//! Each live source stage gets one [`SourceQueue`]: an ordered,
//! append-only buffer of pending output points plus the source's
//! watermark and the time of its next scheduled liveness tick. The queue
//! is mutated by two actors under a single-writer-per-region discipline:
//! the source's read-completion path may only append, and the Emitter
//! role alone drains.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::point::Point;

/// Watermark value meaning "nothing emitted yet".
pub(crate) const WATERMARK_UNSET: i64 = i64::MIN;

/// The scheduler's per-source state.
#[derive(Debug)]
pub struct SourceQueue {
    buffer: VecDeque<Point>,
    capacity: usize,
    /// Timestamp of the last point emitted from this queue.
    watermark: i64,
    /// Logical time the next tick will carry; advances by the source's
    /// tick interval per tick, never behind the watermark.
    tick_clock: i64,
    /// Deadline of the next scheduled liveness tick.
    next_tick: Instant,
    eof: bool,
    failed: bool,
}

impl SourceQueue {
    /// Creates a queue with the given capacity; `from` seeds the tick
    /// clock and `next_tick` is the first liveness deadline.
    #[must_use]
    pub fn new(capacity: usize, from: i64, next_tick: Instant) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            watermark: WATERMARK_UNSET,
            tick_clock: from,
            next_tick,
            eof: false,
            failed: false,
        }
    }

    /// Appends a batch of read points. Only the source's own
    /// read-completion path may call this.
    pub fn append(&mut self, points: Vec<Point>) {
        self.buffer.extend(points);
    }

    /// Drains up to `max` points, recording the timestamp of the last
    /// drained point as the watermark. Only the Emitter role may call
    /// this.
    pub fn drain(&mut self, max: usize) -> Vec<Point> {
        let n = self.buffer.len().min(max);
        let drained: Vec<Point> = self.buffer.drain(..n).collect();
        if let Some(t) = drained.iter().rev().find_map(Point::time) {
            if t > self.watermark {
                self.watermark = t;
            }
        }
        drained
    }

    /// Free capacity remaining.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.buffer.len())
    }

    /// True when the buffer is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Number of pending points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when no points are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The timestamp of the last emitted point, or `None` before any.
    #[must_use]
    pub fn watermark(&self) -> Option<i64> {
        (self.watermark != WATERMARK_UNSET).then_some(self.watermark)
    }

    /// Deadline of the next liveness tick.
    #[must_use]
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    /// Produces the logical time for a tick due now and advances the
    /// deadline by `every`.
    pub fn take_tick(&mut self, every: std::time::Duration) -> i64 {
        #[allow(clippy::cast_possible_truncation)]
        let every_ms = every.as_millis() as i64;
        self.tick_clock = (self.tick_clock + every_ms).max(self.watermark);
        self.next_tick += every;
        self.tick_clock
    }

    /// Marks end-of-stream: the source will produce no more points.
    pub fn set_eof(&mut self) {
        self.eof = true;
    }

    /// True once the source has reached end-of-stream.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Marks the source as permanently failed (implies end-of-stream).
    pub fn fail(&mut self) {
        self.failed = true;
        self.eof = true;
    }

    /// True if the source signalled a fatal read error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }
}
