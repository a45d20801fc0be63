//! Graph builder and composition algebra.
//!
//! The compiler front end drives a [`GraphBuilder`] with an ordered
//! sequence of `add_proc` / composition calls. Each syntactic
//! sub-expression is a [`NodeSet`] with a *head* frontier (entry points)
//! and a *tail* frontier (exit points); sequential composition (`|`)
//! connects tails to heads, parallel composition (`;`) unions frontiers.
//!
//! When the construction routine completes, [`GraphBuilder::finish`] runs
//! the topology validators and the view time-bounds annotator and returns
//! the finished [`FlowGraph`].

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::ast::{Expr, FunctionDef, Param};
use crate::graph::bounds::annotate_time_bounds;
use crate::graph::error::{CompileError, Location};
use crate::graph::graph::{FlowGraph, ResolvedInput};
use crate::graph::node::Pname;
use crate::graph::registry::{ProcRole, StageRegistry};
use crate::graph::validate::{check_dropped_chains, check_runaway};
use crate::point::Value;

/// Supplies a default value for a declared input with no explicit value
/// and no `-default` option, keyed by the input's kind tag and name.
pub type ImplicitDefaultFn = Box<dyn Fn(&str, &str) -> Option<Value> + Send>;

/// The node-set a syntactic sub-expression denotes: its nodes plus the
/// head and tail frontiers used by further composition.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    /// All nodes in the sub-expression.
    pub nodes: Vec<Pname>,
    /// Entry points.
    pub head: Vec<Pname>,
    /// Exit points.
    pub tail: Vec<Pname>,
}

impl NodeSet {
    fn single(pname: Pname) -> Self {
        Self {
            nodes: vec![pname],
            head: vec![pname],
            tail: vec![pname],
        }
    }
}

/// Incremental builder for a [`FlowGraph`].
pub struct GraphBuilder {
    graph: FlowGraph,
    registry: Arc<StageRegistry>,
    /// Declared-name to unique-name mapping, retained for the lifetime of
    /// the build.
    symbols: FxHashMap<String, String>,
    symbol_counter: u32,
    /// Explicit input values supplied at invocation.
    supplied_inputs: FxHashMap<String, Value>,
    implicit_defaults: Option<ImplicitDefaultFn>,
}

impl GraphBuilder {
    /// Creates a builder with the logical "now" of the compilation.
    #[must_use]
    pub fn new(registry: Arc<StageRegistry>, now: i64) -> Self {
        Self {
            graph: FlowGraph::new(Arc::clone(&registry), now),
            registry,
            symbols: FxHashMap::default(),
            symbol_counter: 0,
            supplied_inputs: FxHashMap::default(),
            implicit_defaults: None,
        }
    }

    /// Supplies explicit input values for this invocation.
    pub fn supply_input(&mut self, name: impl Into<String>, value: Value) {
        self.supplied_inputs.insert(name.into(), value);
    }

    /// Installs the caller's implicit-default function for inputs.
    pub fn set_implicit_defaults(&mut self, f: ImplicitDefaultFn) {
        self.implicit_defaults = Some(f);
    }

    /// Read access to the graph under construction.
    #[must_use]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    /// Mutable access to the graph under construction.
    pub fn graph_mut(&mut self) -> &mut FlowGraph {
        &mut self.graph
    }

    /// Adds a single proc and returns it as a one-node set.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::UnknownProc`] if the kind is not registered.
    pub fn add_proc(
        &mut self,
        kind: &str,
        location: Location,
        options: Vec<(String, Expr)>,
    ) -> Result<NodeSet, CompileError> {
        if self.registry.meta(kind).is_none() {
            return Err(CompileError::UnknownProc {
                kind: kind.to_string(),
                location,
            });
        }
        let pname = self.graph.add_node(kind, location)?;
        if let Some(node) = self.graph.node_mut(pname) {
            node.options = options;
        }
        Ok(NodeSet::single(pname))
    }

    /// Sequential composition (`|`): connects every tail node of `a` to
    /// every head node of `b`.
    ///
    /// An edge is only materialized when neither endpoint rejects it by
    /// role. If no edge in the cross product succeeds, composition fails:
    /// every tail of `a` is a sink (`PROC-AFTER-SINK`) or every head of
    /// `b` is a source (`PROC-BEFORE-SOURCE`).
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::ProcAfterSink`] or
    /// [`CompileError::ProcBeforeSource`] on a placement violation.
    pub fn append(&mut self, a: &NodeSet, b: &NodeSet) -> Result<NodeSet, CompileError> {
        let mut connected = 0usize;
        for &tail in &a.tail {
            if self.graph.role(tail) == Some(ProcRole::Sink) {
                continue;
            }
            for &head in &b.head {
                if self.graph.role(head) == Some(ProcRole::Source) {
                    continue;
                }
                self.graph.add_edge(tail, head)?;
                connected += 1;
            }
        }

        if connected == 0 {
            let all_tails_sink = a
                .tail
                .iter()
                .all(|&p| self.graph.role(p) == Some(ProcRole::Sink));
            if all_tails_sink {
                let location = a
                    .tail
                    .first()
                    .and_then(|&p| self.graph.node(p))
                    .map(|n| n.location)
                    .unwrap_or_default();
                return Err(CompileError::ProcAfterSink { location });
            }
            let location = b
                .head
                .iter()
                .find(|&&p| self.graph.role(p) == Some(ProcRole::Source))
                .and_then(|&p| self.graph.node(p))
                .map(|n| n.location)
                .unwrap_or_default();
            return Err(CompileError::ProcBeforeSource { location });
        }

        let mut nodes = a.nodes.clone();
        nodes.extend_from_slice(&b.nodes);
        Ok(NodeSet {
            nodes,
            head: a.head.clone(),
            tail: b.tail.clone(),
        })
    }

    /// Parallel composition (`;`): unions the node lists and frontiers
    /// without adding edges.
    #[must_use]
    pub fn combine(&self, a: &NodeSet, b: &NodeSet) -> NodeSet {
        let mut out = a.clone();
        out.nodes.extend_from_slice(&b.nodes);
        out.head.extend_from_slice(&b.head);
        out.tail.extend_from_slice(&b.tail);
        out
    }

    /// Registers a user function, returning its program-unique symbol.
    pub fn register_function(
        &mut self,
        declared: &str,
        params: Vec<Param>,
        body: Expr,
    ) -> String {
        self.register_symbol(declared, params, body)
    }

    /// Registers a user reducer, returning its program-unique symbol.
    pub fn register_reducer(&mut self, declared: &str, params: Vec<Param>, body: Expr) -> String {
        self.register_symbol(declared, params, body)
    }

    fn register_symbol(&mut self, declared: &str, params: Vec<Param>, body: Expr) -> String {
        let unique = format!("{declared}__{}", self.symbol_counter);
        self.symbol_counter += 1;
        self.symbols.insert(declared.to_string(), unique.clone());
        self.graph.functions.push(FunctionDef {
            declared: declared.to_string(),
            unique: unique.clone(),
            params,
            body,
        });
        unique
    }

    /// Returns the unique symbol a declared name was renamed to.
    #[must_use]
    pub fn symbol(&self, declared: &str) -> Option<&str> {
        self.symbols.get(declared).map(String::as_str)
    }

    /// Records a native module reference.
    pub fn add_native_module(&mut self, name: impl Into<String>) {
        self.graph.native_modules.push(name.into());
    }

    /// Declares a program input and resolves its value immediately, in
    /// priority order: explicit value supplied at invocation, then the
    /// `-default` option on the declaration, then the caller's
    /// implicit-default function keyed by input kind, then null.
    pub fn declare_input(&mut self, name: &str, kind: &str, default: Option<&Expr>) -> Value {
        let value = self
            .supplied_inputs
            .get(name)
            .cloned()
            .or_else(|| default.and_then(Expr::const_value).cloned())
            .or_else(|| {
                self.implicit_defaults
                    .as_ref()
                    .and_then(|f| f(kind, name))
            })
            .unwrap_or(Value::Null);

        self.graph.inputs.push(ResolvedInput {
            name: name.to_string(),
            kind: kind.to_string(),
            value: value.clone(),
        });
        value
    }

    /// Resolves a call's named arguments against a parameter signature,
    /// producing one expression per parameter in signature order.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::SubMissingArg`] when a required parameter
    /// is absent and [`CompileError::SubInvalidArg`] when an argument name
    /// is not in the signature.
    pub fn resolve_args(
        func: &str,
        params: &[Param],
        args: &[(String, Expr)],
        location: Location,
    ) -> Result<Vec<Expr>, CompileError> {
        for (name, _) in args {
            if !params.iter().any(|p| &p.name == name) {
                return Err(CompileError::SubInvalidArg {
                    func: func.to_string(),
                    name: name.clone(),
                    location,
                });
            }
        }

        let mut resolved = Vec::with_capacity(params.len());
        for param in params {
            let supplied = args.iter().find(|(n, _)| n == &param.name).map(|(_, e)| e);
            match (supplied, &param.default) {
                (Some(expr), _) => resolved.push(expr.clone()),
                (None, Some(default)) => resolved.push(default.clone()),
                (None, None) => {
                    return Err(CompileError::SubMissingArg {
                        func: func.to_string(),
                        name: param.name.clone(),
                        location,
                    })
                }
            }
        }
        Ok(resolved)
    }

    /// Finishes the build: runs the topology validators, attaches view
    /// time-bounds annotations, updates statistics, and returns the graph.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::DroppedTopo`] or
    /// [`CompileError::RunawayProgram`] when a validator rejects the
    /// topology. No partial graph is returned.
    pub fn finish(mut self) -> Result<FlowGraph, CompileError> {
        check_dropped_chains(&self.graph)?;
        check_runaway(&self.graph)?;
        annotate_time_bounds(&mut self.graph);
        self.graph.update_stats();
        Ok(self.graph)
    }
}

impl std::fmt::Debug for GraphBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphBuilder")
            .field("procs", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("symbols", &self.symbols.len())
            .finish_non_exhaustive()
    }
}
