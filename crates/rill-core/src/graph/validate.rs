//! Compile-time topology validators.
//!
//! Two independent passes over a finished graph, each an early-return
//! `Result` (no exceptions, no partial verdicts left in the graph):
//!
//! - **Dropped-chain**: the discard pseudo-source's output must stay
//!   strictly linear until it terminates; any branch or join reachable
//!   from it is `DROPPED-TOPO`.
//! - **Runaway**: an unbounded read feeding straight-line into a stage
//!   that buffers unboundedly before producing output is
//!   `RUNAWAY-PROGRAM`. Best-effort: only straight-line runaways are
//!   caught, and branching conservatively ends the walk.

use fxhash::FxHashSet;

use crate::graph::error::CompileError;
use crate::graph::graph::FlowGraph;
use crate::graph::node::{Pname, ProcNode};
use crate::graph::registry::FlowClass;

/// Option names that bound a read's time range from above.
const OPT_TO: &str = "to";
const OPT_LAST: &str = "last";
/// Option that windows an aggregation's output.
const OPT_EVERY: &str = "every";

/// Validates every dropped chain in the graph.
///
/// Starting from each discard pseudo-source, walks forward: the chain
/// must remain single-output and none of its descendants may have more
/// than one input, until the chain naturally terminates at out-degree 0.
///
/// # Errors
///
/// Returns [`CompileError::DroppedTopo`] for any branch or join reachable
/// from a dropped chain, with the offending node's location.
pub fn check_dropped_chains(graph: &FlowGraph) -> Result<(), CompileError> {
    for node in graph.nodes() {
        let discard = graph
            .registry()
            .meta(&node.kind)
            .is_some_and(|m| m.discard);
        if discard {
            walk_dropped_chain(graph, node)?;
        }
    }
    Ok(())
}

fn walk_dropped_chain(graph: &FlowGraph, start: &ProcNode) -> Result<(), CompileError> {
    let mut visited: FxHashSet<Pname> = FxHashSet::default();
    let mut stack: Vec<Pname> = vec![start.pname];

    while let Some(pname) = stack.pop() {
        if !visited.insert(pname) {
            continue;
        }
        let Some(node) = graph.node(pname) else {
            continue;
        };

        if node.out_degree() > 1 {
            return Err(CompileError::DroppedTopo {
                location: node.location,
            });
        }
        for &next in &node.out {
            if let Some(child) = graph.node(next) {
                if child.in_degree() > 1 {
                    return Err(CompileError::DroppedTopo {
                        location: child.location,
                    });
                }
            }
            stack.push(next);
        }
    }
    Ok(())
}

/// Validates that no unbounded read feeds straight-line into an unbounded
/// accumulation.
///
/// From every read with no explicit upper time bound and no `last`
/// window, walks forward only while the path remains strictly linear
/// (single output, single input at each step); branching ends the walk
/// without a verdict. A time-windowing stage ends the walk safely; an
/// accumulating stage, or an aggregation without its own windowing
/// option, is an error.
///
/// # Errors
///
/// Returns [`CompileError::RunawayProgram`] naming the accumulating stage.
pub fn check_runaway(graph: &FlowGraph) -> Result<(), CompileError> {
    for node in graph.nodes() {
        let historic = graph
            .registry()
            .meta(&node.kind)
            .is_some_and(|m| m.historic_read);
        let unbounded = historic && !node.has_option(OPT_TO) && !node.has_option(OPT_LAST);
        if unbounded {
            walk_runaway(graph, node)?;
        }
    }
    Ok(())
}

fn walk_runaway(graph: &FlowGraph, read: &ProcNode) -> Result<(), CompileError> {
    let mut current = read;

    loop {
        if current.out_degree() != 1 {
            // Branching (or termination) ends the walk without a verdict.
            return Ok(());
        }
        let Some(next) = graph.node(current.out[0]) else {
            return Ok(());
        };
        if next.in_degree() != 1 {
            return Ok(());
        }

        let flow = graph
            .registry()
            .meta(&next.kind)
            .map(|m| m.flow)
            .unwrap_or_default();

        match flow {
            FlowClass::Windowing => return Ok(()),
            FlowClass::Accumulating => {
                return Err(CompileError::RunawayProgram {
                    kind: next.kind.clone(),
                    location: next.location,
                })
            }
            FlowClass::AggregatingUnlessWindowed => {
                if next.has_option(OPT_EVERY) {
                    return Ok(());
                }
                return Err(CompileError::RunawayProgram {
                    kind: next.kind.clone(),
                    location: next.location,
                });
            }
            FlowClass::Passthrough => current = next,
        }
    }
}
