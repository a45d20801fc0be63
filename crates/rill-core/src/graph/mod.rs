//! Flow graph representation and composition/validation algebra.
//!
//! A compiled program is a DAG of processing stages ("procs") built
//! incrementally from the language's sequential (`|`) and parallel (`;`)
//! composition operators. This module owns the graph data structure, the
//! builder that implements the composition algebra, the compile-time
//! topology validators, and the view time-bounds annotator.

pub mod bounds;
pub mod builder;
pub mod error;
#[allow(clippy::module_inception)]
pub mod graph;
pub mod node;
pub mod registry;
pub mod validate;


pub use bounds::TimeBounds;
pub use builder::{GraphBuilder, NodeSet};
pub use error::{CompileError, GraphError, Location};
pub use graph::FlowGraph;
pub use node::{Pname, ProcNode, Shortcut};
pub use registry::{FlowClass, ProcRole, StageMeta, StageRegistry};
