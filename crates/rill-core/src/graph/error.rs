//! Error types for graph construction and compilation.
//!
//! Two taxonomies:
//! - [`GraphError`]: structural guard failures (invalid edge, missing
//!   node). These indicate a builder bug, not a user-facing condition;
//!   they are surfaced as `Result` values rather than panics so callers
//!   can assert on them.
//! - [`CompileError`]: user-facing compile failures, each carrying the
//!   offending node's source location and a stable error code. All are
//!   fatal to compilation; no partial graph is returned.

use std::fmt;

use crate::graph::node::Pname;

/// A source location (1-based line and column); `0:0` means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl Location {
    /// Creates a location.
    #[must_use]
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Returns true if this location is the unknown placeholder.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.line == 0 && self.column == 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// Structural guard failures in graph mutation primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// An operation referenced a node that does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(Pname),

    /// An edge in the same direction already connects the two nodes.
    #[error("duplicate edge: {from} -> {to}")]
    DuplicateEdge {
        /// Tail of the edge.
        from: Pname,
        /// Head of the edge.
        to: Pname,
    },

    /// Attempted to remove an edge that does not exist.
    #[error("edge not found: {from} -> {to}")]
    EdgeNotFound {
        /// Tail of the edge.
        from: Pname,
        /// Head of the edge.
        to: Pname,
    },

    /// An edge may not connect a node to itself.
    #[error("self loop on node {0}")]
    SelfLoop(Pname),

    /// A sink-role node may not gain outbound edges.
    #[error("cannot add an output to sink node {0}")]
    EdgeFromSink(Pname),

    /// A source-role node may not gain inbound edges.
    #[error("cannot add an input to source node {0}")]
    EdgeIntoSource(Pname),

    /// A shortcut's pair must already be a direct input of its destination.
    #[error("invalid shortcut: {pair} is not an input of {dest}")]
    InvalidShortcut {
        /// The claimed pair node.
        pair: Pname,
        /// The shortcut destination.
        dest: Pname,
    },

    /// The node's type tag is not present in the stage registry.
    #[error("unknown proc kind: {0}")]
    UnknownKind(String),
}

/// User-facing compile failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// Sequential composition placed a proc after a sink.
    #[error("cannot connect a proc after a sink ({location})")]
    ProcAfterSink {
        /// Location of the offending sink.
        location: Location,
    },

    /// Sequential composition placed a proc before a source.
    #[error("cannot connect a proc before a source ({location})")]
    ProcBeforeSource {
        /// Location of the offending source.
        location: Location,
    },

    /// A required call argument was not supplied.
    #[error("call to {func} is missing required argument {name} ({location})")]
    SubMissingArg {
        /// The callee.
        func: String,
        /// The missing parameter name.
        name: String,
        /// Location of the call.
        location: Location,
    },

    /// A call supplied an argument not in the parameter signature.
    #[error("call to {func} has unknown argument {name} ({location})")]
    SubInvalidArg {
        /// The callee.
        func: String,
        /// The unexpected argument name.
        name: String,
        /// Location of the call.
        location: Location,
    },

    /// A dropped chain branches or feeds a join.
    #[error("the output of a dropped chain may not branch or join ({location})")]
    DroppedTopo {
        /// Location of the branching or joining node.
        location: Location,
    },

    /// An unbounded read feeds a stage that buffers unboundedly before
    /// producing any output.
    #[error(
        "unbounded read feeds {kind}, which will buffer forever; \
         bound the read or window the stage ({location})"
    )]
    RunawayProgram {
        /// Kind of the accumulating stage.
        kind: String,
        /// Location of the accumulating stage.
        location: Location,
    },

    /// The node's type tag is not present in the stage registry.
    #[error("unknown proc: {kind} ({location})")]
    UnknownProc {
        /// The unrecognized type tag.
        kind: String,
        /// Location of the proc.
        location: Location,
    },

    /// A structural guard failed during construction (builder bug).
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
}

impl CompileError {
    /// Returns the stable error code for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::ProcAfterSink { .. } => "PROC-AFTER-SINK",
            CompileError::ProcBeforeSource { .. } => "PROC-BEFORE-SOURCE",
            CompileError::SubMissingArg { .. } => "SUB-MISSING-ARG",
            CompileError::SubInvalidArg { .. } => "SUB-INVALID-ARG",
            CompileError::DroppedTopo { .. } => "DROPPED-TOPO",
            CompileError::RunawayProgram { .. } => "RUNAWAY-PROGRAM",
            CompileError::UnknownProc { .. } => "UNKNOWN-PROC",
            CompileError::Graph(_) => "GRAPH-INTERNAL",
        }
    }
}
