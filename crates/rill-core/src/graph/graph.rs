//! The flow graph aggregate and its mutation primitives.
//!
//! Nodes and edges are created only during the build phase (single pass,
//! no concurrent mutation); the validators only read. Edges are stored
//! symmetrically on both endpoints (`out` on the tail, `in_` on the head).

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::ast::FunctionDef;
use crate::graph::error::{GraphError, Location};
use crate::graph::node::{Pname, ProcNode, Shortcut};
use crate::graph::registry::{ProcRole, StageRegistry};
use crate::point::Value;

/// A declared program input with its resolved value.
///
/// Resolution happens once, at declaration time; the resolved value is
/// baked into the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    /// Input name as declared.
    pub name: String,
    /// Input kind tag (drives implicit defaults).
    pub kind: String,
    /// The resolved value.
    pub value: Value,
}

/// Compile-time statistics, filled in when the build finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Number of procs.
    pub procs: usize,
    /// Number of edges.
    pub edges: usize,
    /// Number of declared inputs.
    pub inputs: usize,
    /// Number of registered user functions and reducers.
    pub functions: usize,
}

/// The aggregate a finished build produces: the node list plus
/// builder-level metadata.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    nodes: Vec<ProcNode>,
    index: FxHashMap<Pname, usize>,
    next_pname: u32,
    registry: Arc<StageRegistry>,
    /// Declared program inputs with resolved values.
    pub inputs: Vec<ResolvedInput>,
    /// User functions and reducers, under builder-unique renamed symbols.
    pub functions: Vec<FunctionDef>,
    /// Native module references.
    pub native_modules: Vec<String>,
    /// The logical "now" timestamp of the compilation, in milliseconds.
    pub now: i64,
    /// Compile-time statistics.
    pub stats: GraphStats,
}

impl FlowGraph {
    /// Creates an empty graph bound to a stage registry.
    #[must_use]
    pub fn new(registry: Arc<StageRegistry>, now: i64) -> Self {
        Self {
            nodes: Vec::new(),
            index: FxHashMap::default(),
            next_pname: 0,
            registry,
            inputs: Vec::new(),
            functions: Vec::new(),
            native_modules: Vec::new(),
            now,
            stats: GraphStats::default(),
        }
    }

    /// Returns the stage registry this graph was built against.
    #[must_use]
    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Adds a node of the given kind, allocating the next pname.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownKind`] if the kind is not registered.
    pub fn add_node(
        &mut self,
        kind: impl Into<String>,
        location: Location,
    ) -> Result<Pname, GraphError> {
        let kind = kind.into();
        if self.registry.meta(&kind).is_none() {
            return Err(GraphError::UnknownKind(kind));
        }

        let pname = Pname(self.next_pname);
        self.next_pname += 1;

        self.index.insert(pname, self.nodes.len());
        self.nodes.push(ProcNode::new(pname, kind, location));

        Ok(pname)
    }

    /// Returns a node by pname.
    #[must_use]
    pub fn node(&self, pname: Pname) -> Option<&ProcNode> {
        self.index.get(&pname).map(|&i| &self.nodes[i])
    }

    /// Returns a mutable node by pname.
    pub fn node_mut(&mut self, pname: Pname) -> Option<&mut ProcNode> {
        let i = *self.index.get(&pname)?;
        Some(&mut self.nodes[i])
    }

    /// Iterates nodes in pname order.
    pub fn nodes(&self) -> impl Iterator<Item = &ProcNode> {
        self.nodes.iter()
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.iter().map(ProcNode::out_degree).sum()
    }

    /// Returns the role of a node, derived from its kind.
    #[must_use]
    pub fn role(&self, pname: Pname) -> Option<ProcRole> {
        self.node(pname).and_then(|n| self.registry.role(&n.kind))
    }

    /// Returns true if an edge `from -> to` exists.
    #[must_use]
    pub fn has_edge(&self, from: Pname, to: Pname) -> bool {
        self.node(from).is_some_and(|n| n.out.contains(&to))
    }

    /// Adds a directed edge, enforcing placement invariants at creation
    /// time: a sink may not gain outputs and a source may not gain inputs.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`], [`GraphError::SelfLoop`],
    /// [`GraphError::DuplicateEdge`], [`GraphError::EdgeFromSink`], or
    /// [`GraphError::EdgeIntoSource`].
    pub fn add_edge(&mut self, from: Pname, to: Pname) -> Result<(), GraphError> {
        if from == to {
            return Err(GraphError::SelfLoop(from));
        }
        if self.node(to).is_none() {
            return Err(GraphError::NodeNotFound(to));
        }
        if self.node(from).is_none() {
            return Err(GraphError::NodeNotFound(from));
        }
        if self.has_edge(from, to) {
            return Err(GraphError::DuplicateEdge { from, to });
        }
        if self.role(from) == Some(ProcRole::Sink) {
            return Err(GraphError::EdgeFromSink(from));
        }
        if self.role(to) == Some(ProcRole::Source) {
            return Err(GraphError::EdgeIntoSource(to));
        }

        // Stored symmetrically on both endpoints.
        if let Some(n) = self.node_mut(from) {
            n.out.push(to);
        }
        if let Some(n) = self.node_mut(to) {
            n.in_.push(from);
        }
        Ok(())
    }

    /// Removes a directed edge.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EdgeNotFound`] if the edge does not exist.
    pub fn remove_edge(&mut self, from: Pname, to: Pname) -> Result<(), GraphError> {
        if !self.has_edge(from, to) {
            return Err(GraphError::EdgeNotFound { from, to });
        }
        // SmallVec's retain hands the closure a mutable reference.
        if let Some(n) = self.node_mut(from) {
            n.out.retain(|p| *p != to);
        }
        if let Some(n) = self.node_mut(to) {
            n.in_.retain(|p| *p != from);
        }
        Ok(())
    }

    /// Removes a node, rewiring every (input, output) pair into direct
    /// edges so reachability is preserved and no dangling pname references
    /// remain. Shortcuts touching the node are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if the node does not exist.
    pub fn remove_node(&mut self, pname: Pname) -> Result<(), GraphError> {
        let node = self.node(pname).ok_or(GraphError::NodeNotFound(pname))?;
        let ins: Vec<Pname> = node.in_.iter().copied().collect();
        let outs: Vec<Pname> = node.out.iter().copied().collect();

        for &from in &ins {
            self.remove_edge(from, pname)?;
        }
        for &to in &outs {
            self.remove_edge(pname, to)?;
        }

        // Rewire the cross product. An input of the removed node cannot be
        // a sink and an output cannot be a source (they held an edge), so
        // only duplicates need skipping.
        for &from in &ins {
            for &to in &outs {
                if !self.has_edge(from, to) {
                    self.add_edge(from, to)?;
                }
            }
        }

        let idx = self.index.remove(&pname).ok_or(GraphError::NodeNotFound(pname))?;
        self.nodes.remove(idx);
        for (i, n) in self.nodes.iter().enumerate() {
            self.index.insert(n.pname, i);
        }

        for n in &mut self.nodes {
            n.shortcuts
                .retain(|s| s.dest != pname && s.pair != pname);
        }
        Ok(())
    }

    /// Adds a shortcut from `source` to `dest`, paired with an existing
    /// direct input `pair` of `dest`.
    ///
    /// Unlike an edge, a shortcut may exist even when a topological path
    /// already connects the two nodes.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::NodeNotFound`] if either endpoint is missing,
    /// or [`GraphError::InvalidShortcut`] if `pair` is not a direct input
    /// of `dest`.
    pub fn add_shortcut(
        &mut self,
        source: Pname,
        pair: Pname,
        dest: Pname,
        name: impl Into<String>,
    ) -> Result<(), GraphError> {
        if self.node(source).is_none() {
            return Err(GraphError::NodeNotFound(source));
        }
        let dest_node = self.node(dest).ok_or(GraphError::NodeNotFound(dest))?;
        if !dest_node.in_.contains(&pair) {
            return Err(GraphError::InvalidShortcut { pair, dest });
        }
        if let Some(n) = self.node_mut(source) {
            n.shortcuts.push(Shortcut {
                pair,
                dest,
                name: name.into(),
            });
        }
        Ok(())
    }

    /// Recomputes the compile-time statistics.
    pub fn update_stats(&mut self) {
        self.stats = GraphStats {
            procs: self.node_count(),
            edges: self.edge_count(),
            inputs: self.inputs.len(),
            functions: self.functions.len(),
        };
    }
}
