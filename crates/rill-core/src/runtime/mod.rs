//! Runtime flow-control engine.
//!
//! Turns a static flow graph into a live, correctly time-ordered,
//! backpressure-aware stream execution:
//!
//! - [`scheduler::FlowControl`] owns one bounded queue per source stage,
//!   fills queues from asynchronous reads (Reader role), and periodically
//!   drains them downstream in time order with liveness ticks (Emitter
//!   role), subject to sink-driven backpressure.
//! - [`ordered::Ordered`] wraps any multi-input merge stage and enforces
//!   the scheduler's ordering contract, dropping and warning on
//!   violations rather than failing the pipeline.

pub mod error;
pub mod ordered;
pub mod queue;
pub mod scheduler;
pub mod stage;

#[cfg(test)]
mod tests;

pub use error::RuntimeError;
pub use ordered::{Ordered, OrderedConfig};
pub use queue::SourceQueue;
pub use scheduler::{BackpressureHandle, FlowControl, FlowControlConfig, FlowControlMetrics};
pub use stage::{Downstream, ReadRequest, ReadResult, SinkStage, SourceStage, READ_END_EOF};
