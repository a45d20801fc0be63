//! # rill-core
//!
//! The core of the rill streaming dataflow engine: programs in the rill
//! language are compiled into a directed graph of processing stages
//! ("procs") and then executed by a flow-control scheduler that pulls data
//! from sources, pushes it through the graph, and balances throughput
//! against memory use.
//!
//! This crate provides:
//! - **Graph model**: nodes, edges, shortcuts, and mutation primitives
//! - **Composition algebra**: the `|` (sequential) and `;` (parallel)
//!   operators with source/sink placement enforcement
//! - **Topology validators**: compile-time rejection of dropped-chain and
//!   runaway programs
//! - **Flow-control scheduler**: bounded per-source queues, liveness ticks,
//!   and sink-driven backpressure
//! - **Order-enforcing fan-in**: a decorator that guarantees monotonic
//!   output ordering at merge points
//!
//! The lexer/parser, the full expression/value system, concrete source and
//! sink adapters, and renderers are external collaborators; this crate owns
//! only the in-memory graph and queue contracts.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ast;
pub mod graph;
pub mod point;
pub mod runtime;

pub use graph::builder::{GraphBuilder, NodeSet};
pub use graph::error::{CompileError, GraphError};
pub use graph::graph::FlowGraph;
pub use graph::node::{Pname, ProcNode};
pub use graph::registry::{ProcRole, StageRegistry};
pub use runtime::scheduler::{FlowControl, FlowControlConfig};
