//! View time-bounds annotator.
//!
//! For each terminal sink node, collects the historic time range covered
//! by every ancestor read and attaches the list to the sink as metadata,
//! for use by downstream consumers (renderers that want to label a view's
//! x-axis, for example). Purely additive; never rejects a program.

use fxhash::FxHashSet;

use crate::ast::Expr;
use crate::graph::graph::FlowGraph;
use crate::graph::node::Pname;
use crate::graph::registry::ProcRole;
use crate::point::Value;
use serde::Serialize;

/// The declared time range of one ancestor read, each bound nullable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBounds {
    /// The `-from` option's constant value, if set and constant.
    pub from: Option<Value>,
    /// The `-to` option's constant value.
    pub to: Option<Value>,
    /// The `-last` option's constant value.
    pub last: Option<Value>,
}

/// Attaches time-bounds metadata to every terminal sink node.
///
/// Performs a reverse traversal from each sink, collecting every ancestor
/// that is a read stage, short-circuiting (not recursing past) each read
/// found, and deduplicating. Reads are reported in pname order so the
/// annotation is deterministic.
pub fn annotate_time_bounds(graph: &mut FlowGraph) {
    let sinks: Vec<Pname> = graph
        .nodes()
        .filter(|n| graph.registry().role(&n.kind) == Some(ProcRole::Sink))
        .map(|n| n.pname)
        .collect();

    for sink in sinks {
        let mut reads = collect_ancestor_reads(graph, sink);
        reads.sort_unstable();

        let bounds: Vec<TimeBounds> = reads
            .iter()
            .filter_map(|&p| graph.node(p))
            .map(|n| TimeBounds {
                from: const_option(n.option("from")),
                to: const_option(n.option("to")),
                last: const_option(n.option("last")),
            })
            .collect();

        if let Some(node) = graph.node_mut(sink) {
            node.time_bounds = Some(bounds);
        }
    }
}

fn collect_ancestor_reads(graph: &FlowGraph, sink: Pname) -> Vec<Pname> {
    let mut visited: FxHashSet<Pname> = FxHashSet::default();
    let mut reads: Vec<Pname> = Vec::new();
    let mut stack: Vec<Pname> = vec![sink];

    while let Some(pname) = stack.pop() {
        if !visited.insert(pname) {
            continue;
        }
        let Some(node) = graph.node(pname) else {
            continue;
        };

        let is_read = graph
            .registry()
            .meta(&node.kind)
            .is_some_and(|m| m.historic_read);
        if is_read {
            // Short-circuit: do not recurse past a read.
            reads.push(pname);
            continue;
        }
        for &prev in &node.in_ {
            stack.push(prev);
        }
    }
    reads
}

fn const_option(expr: Option<&Expr>) -> Option<Value> {
    expr.and_then(Expr::const_value).cloned()
}
