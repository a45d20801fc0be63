//! Stage registry: type tag to role, flow class, and stage factory.
//!
//! Every node's `kind` must resolve here. The graph builder and the
//! topology validators consult only the metadata (role and flow class),
//! never stage internals; the scheduler uses the factories to instantiate
//! runnable source and sink stages. Callers extend the built-in table with
//! their own adapters via [`StageRegistry::register`].

use std::sync::Arc;

use fxhash::FxHashMap;

use crate::graph::node::ProcNode;
use crate::runtime::stage::{SinkStage, SourceStage};

/// The role a stage plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcRole {
    /// Produces points; may not gain inbound edges.
    Source,
    /// Consumes and emits points.
    Transform,
    /// Consumes points; may not gain outbound edges.
    Sink,
}

/// How a stage behaves with respect to buffering, for the runaway check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowClass {
    /// Forwards points incrementally; the walk continues through it.
    #[default]
    Passthrough,
    /// Windows its input by time (e.g. `batch`); downstream is bounded.
    Windowing,
    /// Must buffer its entire input before producing output (e.g. `tail`,
    /// `sort`).
    Accumulating,
    /// Aggregates; bounded only when the node carries its own windowing
    /// option (e.g. `reduce -every`).
    AggregatingUnlessWindowed,
}

/// Per-kind metadata consulted by the builder and validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMeta {
    /// Topological role.
    pub role: ProcRole,
    /// Buffering behavior.
    pub flow: FlowClass,
    /// True for the discard pseudo-source whose output must stay linear.
    pub discard: bool,
    /// True for sources that read a historic time range (`-from`/`-to`/
    /// `-last` options), which the bounds annotator and runaway check
    /// inspect.
    pub historic_read: bool,
}

impl StageMeta {
    /// Metadata for an ordinary source.
    #[must_use]
    pub fn source() -> Self {
        Self {
            role: ProcRole::Source,
            flow: FlowClass::Passthrough,
            discard: false,
            historic_read: false,
        }
    }

    /// Metadata for a transform with the given flow class.
    #[must_use]
    pub fn transform(flow: FlowClass) -> Self {
        Self {
            role: ProcRole::Transform,
            flow,
            discard: false,
            historic_read: false,
        }
    }

    /// Metadata for a sink.
    #[must_use]
    pub fn sink() -> Self {
        Self {
            role: ProcRole::Sink,
            flow: FlowClass::Passthrough,
            discard: false,
            historic_read: false,
        }
    }
}

/// Factory producing a runnable source stage for a node.
pub type SourceFactory = Arc<dyn Fn(&ProcNode) -> Box<dyn SourceStage> + Send + Sync>;

/// Factory producing a runnable sink stage for a node.
pub type SinkFactory = Arc<dyn Fn(&ProcNode) -> Box<dyn SinkStage> + Send + Sync>;

/// Registry mapping a type tag to stage metadata and factories.
#[derive(Default, Clone)]
pub struct StageRegistry {
    metas: FxHashMap<String, StageMeta>,
    source_factories: FxHashMap<String, SourceFactory>,
    sink_factories: FxHashMap<String, SinkFactory>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("kinds", &self.metas.len())
            .field("source_factories", &self.source_factories.len())
            .field("sink_factories", &self.sink_factories.len())
            .finish()
    }
}

impl StageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the language's stock procs.
    #[must_use]
    pub fn builtin() -> Self {
        let mut r = Self::new();

        r.register(
            "read",
            StageMeta {
                historic_read: true,
                ..StageMeta::source()
            },
        );
        r.register("emit", StageMeta::source());
        r.register(
            "dropped",
            StageMeta {
                discard: true,
                ..StageMeta::source()
            },
        );

        r.register("put", StageMeta::transform(FlowClass::Passthrough));
        r.register("filter", StageMeta::transform(FlowClass::Passthrough));
        r.register("head", StageMeta::transform(FlowClass::Passthrough));
        r.register("join", StageMeta::transform(FlowClass::Passthrough));
        r.register("merge", StageMeta::transform(FlowClass::Passthrough));
        r.register("batch", StageMeta::transform(FlowClass::Windowing));
        r.register("sort", StageMeta::transform(FlowClass::Accumulating));
        r.register("tail", StageMeta::transform(FlowClass::Accumulating));
        r.register(
            "reduce",
            StageMeta::transform(FlowClass::AggregatingUnlessWindowed),
        );

        r.register("view", StageMeta::sink());
        r.register("write", StageMeta::sink());

        r
    }

    /// Registers (or replaces) metadata for a kind.
    pub fn register(&mut self, kind: impl Into<String>, meta: StageMeta) {
        self.metas.insert(kind.into(), meta);
    }

    /// Registers a source stage factory for a kind.
    pub fn register_source_factory(&mut self, kind: impl Into<String>, factory: SourceFactory) {
        self.source_factories.insert(kind.into(), factory);
    }

    /// Registers a sink stage factory for a kind.
    pub fn register_sink_factory(&mut self, kind: impl Into<String>, factory: SinkFactory) {
        self.sink_factories.insert(kind.into(), factory);
    }

    /// Returns the metadata for a kind.
    #[must_use]
    pub fn meta(&self, kind: &str) -> Option<&StageMeta> {
        self.metas.get(kind)
    }

    /// Returns the role for a kind.
    #[must_use]
    pub fn role(&self, kind: &str) -> Option<ProcRole> {
        self.metas.get(kind).map(|m| m.role)
    }

    /// Instantiates a runnable source stage for a node, if a factory is
    /// registered for its kind.
    #[must_use]
    pub fn make_source(&self, node: &ProcNode) -> Option<Box<dyn SourceStage>> {
        self.source_factories.get(&node.kind).map(|f| f(node))
    }

    /// Instantiates a runnable sink stage for a node, if a factory is
    /// registered for its kind.
    #[must_use]
    pub fn make_sink(&self, node: &ProcNode) -> Option<Box<dyn SinkStage>> {
        self.sink_factories.get(&node.kind).map(|f| f(node))
    }
}
