//! Runnable stage contracts.
//!
//! Concrete adapters (file/HTTP/stdio/synthetic generators, renderers)
//! live outside this crate and implement these traits; the scheduler
//! consumes them. A source's `read` is the only operation expected to
//! suspend for non-trivial time; everything else here is synchronous.

use std::time::Duration;

use async_trait::async_trait;

use crate::point::{Point, StreamItem};
use crate::runtime::error::RuntimeError;
use crate::runtime::scheduler::BackpressureHandle;

/// Sentinel `read_end` value marking end-of-stream.
pub const READ_END_EOF: i64 = i64::MAX;

/// Default liveness tick interval for live sources.
pub const DEFAULT_TICK_EVERY: Duration = Duration::from_millis(200);

/// One read issued by the scheduler's Reader role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Lower time bound (inclusive) of the requested window.
    pub from: i64,
    /// Upper time bound of the requested window; [`READ_END_EOF`] means
    /// unbounded.
    pub to: i64,
    /// Maximum number of points to return (the queue's free capacity).
    pub limit: usize,
    /// Opaque continuation state returned by the previous read.
    pub state: Option<String>,
}

/// The asynchronous result of a read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    /// The points read, in the source's own order.
    pub points: Vec<Point>,
    /// How far the source has read contiguously. Equal to the request's
    /// `to` means the window is fully satisfied; [`READ_END_EOF`] means
    /// end-of-stream.
    pub read_end: i64,
    /// Continuation state to hand to the next read.
    pub state: Option<String>,
}

/// A source stage: the entry point of data into a program.
///
/// Each source's read is an independent asynchronous operation; the
/// scheduler never blocks waiting on one source while another could
/// progress, and it stops consuming results after shutdown. Reads are
/// expected to be independently cancellable.
#[async_trait]
pub trait SourceStage: Send {
    /// Whether this source is live: expected to keep producing
    /// indefinitely and therefore due for periodic liveness ticks.
    fn wants_live(&self) -> bool {
        false
    }

    /// The interval between this source's liveness ticks.
    fn tick_every(&self) -> Duration {
        DEFAULT_TICK_EVERY
    }

    /// Reads up to `limit` points in `[from, to)`.
    ///
    /// # Errors
    ///
    /// A returned error is fatal for this source: the scheduler stops
    /// scheduling it and surfaces the condition.
    async fn read(&mut self, req: ReadRequest) -> Result<ReadResult, RuntimeError>;
}

/// The consumer the Emitter role pushes batches into: the downstream
/// graph entry point for one source.
pub trait Downstream: Send {
    /// Accepts a batch of stream items, in emission order.
    fn emit(&mut self, items: Vec<StreamItem>);
}

/// A sink stage: the terminal consumer of a stream.
///
/// A sink tracks its own outstanding (unflushed) point count and uses
/// the [`BackpressureHandle`] given to it at attach time to suspend and
/// resume the scheduler's draining around its own threshold.
pub trait SinkStage: Downstream {
    /// Hands the sink the scheduler's backpressure handle.
    fn attach(&mut self, handle: BackpressureHandle) {
        let _ = handle;
    }

    /// Signals that no further items will arrive.
    fn eof(&mut self) {}
}

impl Downstream for Box<dyn SinkStage> {
    fn emit(&mut self, items: Vec<StreamItem>) {
        (**self).emit(items);
    }
}
