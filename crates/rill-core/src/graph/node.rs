//! Graph node types: `Pname`, `ProcNode`, and `Shortcut`.

use std::fmt;

use smallvec::SmallVec;

use crate::ast::Expr;
use crate::graph::bounds::TimeBounds;
use crate::graph::error::Location;

/// Stable positional identifier of a proc, assigned sequentially at
/// construction and never reused within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pname(pub u32);

impl fmt::Display for Pname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A non-topological fast path between two procs.
///
/// Stored on the source node. Legal only when `pair` is already one of
/// `dest`'s direct inputs; used purely as a runtime hint (e.g. to let an
/// optimizer route data around intermediate no-op stages). Validators
/// never treat a shortcut as a real edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortcut {
    /// The existing input of `dest` this shortcut pairs with.
    pub pair: Pname,
    /// The destination proc.
    pub dest: Pname,
    /// Hint name, interpreted by the consumer.
    pub name: String,
}

/// One processing stage in the flow graph.
///
/// A node's role (source/sink/transform) is derived from its `kind` via
/// the stage registry, never stored redundantly.
#[derive(Debug, Clone)]
pub struct ProcNode {
    /// Positional identifier.
    pub pname: Pname,
    /// Type tag selecting the stage implementation ("read", "put", ...).
    pub kind: String,
    /// Optional instance name.
    pub name: Option<String>,
    /// Source location, for diagnostics.
    pub location: Location,
    /// Ordered option-name to option-value expressions.
    pub options: Vec<(String, Expr)>,
    /// Outbound pname references. `SmallVec` avoids heap alloc for <= 4 edges.
    pub out: SmallVec<[Pname; 4]>,
    /// Inbound pname references.
    pub in_: SmallVec<[Pname; 4]>,
    /// Shortcuts originating at this node.
    pub shortcuts: Vec<Shortcut>,
    /// Historic time bounds covered by this node, attached by the view
    /// time-bounds annotator to terminal sinks only.
    pub time_bounds: Option<Vec<TimeBounds>>,
}

impl ProcNode {
    pub(crate) fn new(pname: Pname, kind: impl Into<String>, location: Location) -> Self {
        Self {
            pname,
            kind: kind.into(),
            name: None,
            location,
            options: Vec::new(),
            out: SmallVec::new(),
            in_: SmallVec::new(),
            shortcuts: Vec::new(),
            time_bounds: None,
        }
    }

    /// Returns the expression for an option, if set.
    #[must_use]
    pub fn option(&self, name: &str) -> Option<&Expr> {
        self.options
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Returns true if the option is present.
    #[must_use]
    pub fn has_option(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    /// Number of outbound edges.
    #[must_use]
    pub fn out_degree(&self) -> usize {
        self.out.len()
    }

    /// Number of inbound edges.
    #[must_use]
    pub fn in_degree(&self) -> usize {
        self.in_.len()
    }
}
