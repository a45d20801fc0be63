//! Scheduler and ordering tests.
//!
//! Scheduler tests run under a paused tokio clock so tick and interval
//! timing is deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::ast::Expr;
use crate::graph::builder::GraphBuilder;
use crate::graph::error::Location;
use crate::graph::node::{Pname, ProcNode};
use crate::graph::registry::StageRegistry;
use crate::point::{Point, StreamItem, Value};
use crate::runtime::error::RuntimeError;
use crate::runtime::ordered::{Ordered, OrderedConfig};
use crate::runtime::scheduler::{
    BackpressureHandle, FlowControl, FlowControlConfig, SchedulerState,
};
use crate::runtime::stage::{
    Downstream, ReadRequest, ReadResult, SinkStage, SourceStage, READ_END_EOF,
};

/// Surfaces scheduler warnings when a test is run with `--nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rill_core=debug")
        .with_test_writer()
        .try_init();
}

/// Scripted source: serves a fixed set of points, then signals the
/// configured `read_end`.
struct TestSource {
    points: Vec<Point>,
    pos: usize,
    per_read: usize,
    live: bool,
    final_read_end: i64,
    /// The `limit` of every read request received, observable from the
    /// test after the source is boxed away.
    seen_limits: Arc<Mutex<Vec<usize>>>,
}

impl TestSource {
    /// A historic source reading the given timestamps, then end-of-stream.
    fn historic(times: &[i64]) -> Self {
        Self {
            points: times.iter().copied().map(Point::at).collect(),
            pos: 0,
            per_read: usize::MAX,
            live: false,
            final_read_end: READ_END_EOF,
            seen_limits: Arc::default(),
        }
    }

    /// A live source that serves the given timestamps then goes quiet at
    /// end-of-stream.
    fn live(times: &[i64]) -> Self {
        Self {
            live: true,
            ..Self::historic(times)
        }
    }

    /// A live source that never produces anything.
    fn live_silent() -> Self {
        Self {
            points: Vec::new(),
            pos: 0,
            per_read: usize::MAX,
            live: true,
            final_read_end: 0,
            seen_limits: Arc::default(),
        }
    }
}

#[async_trait]
impl SourceStage for TestSource {
    fn wants_live(&self) -> bool {
        self.live
    }

    async fn read(&mut self, req: ReadRequest) -> Result<ReadResult, RuntimeError> {
        self.seen_limits.lock().push(req.limit);
        let remaining = self.points.len() - self.pos;
        let n = remaining.min(req.limit).min(self.per_read);
        let batch = self.points[self.pos..self.pos + n].to_vec();
        self.pos += n;

        let read_end = if self.pos == self.points.len() {
            self.final_read_end
        } else {
            batch.last().and_then(Point::time).unwrap_or(req.from)
        };
        Ok(ReadResult {
            points: batch,
            read_end,
            state: None,
        })
    }
}

/// Source whose first read fails.
struct FailSource;

#[async_trait]
impl SourceStage for FailSource {
    async fn read(&mut self, _req: ReadRequest) -> Result<ReadResult, RuntimeError> {
        Err(RuntimeError::SourceRead {
            reason: "connection refused".into(),
        })
    }
}

/// Downstream that records everything it receives.
#[derive(Clone, Default)]
struct CollectSink {
    items: Arc<Mutex<Vec<StreamItem>>>,
}

impl CollectSink {
    fn point_times(&self) -> Vec<i64> {
        self.items
            .lock()
            .iter()
            .filter_map(|i| match i {
                StreamItem::Point(p) => p.time(),
                _ => None,
            })
            .collect()
    }

    fn tick_times(&self) -> Vec<i64> {
        self.items
            .lock()
            .iter()
            .filter_map(|i| match i {
                StreamItem::Tick(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    fn has_eof(&self) -> bool {
        self.items.lock().iter().any(|i| matches!(i, StreamItem::Eof))
    }

    fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl Downstream for CollectSink {
    fn emit(&mut self, items: Vec<StreamItem>) {
        self.items.lock().extend(items);
    }
}

/// Full sink-contract implementation: records what it receives, the
/// backpressure handle it was given, and how often `eof` fired.
#[derive(Clone, Default)]
struct RecordingSink {
    inner: CollectSink,
    handle: Arc<Mutex<Option<BackpressureHandle>>>,
    eof_calls: Arc<AtomicUsize>,
}

impl Downstream for RecordingSink {
    fn emit(&mut self, items: Vec<StreamItem>) {
        self.inner.emit(items);
    }
}

impl SinkStage for RecordingSink {
    fn attach(&mut self, handle: BackpressureHandle) {
        *self.handle.lock() = Some(handle);
    }

    fn eof(&mut self) {
        self.eof_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// ---- Scheduler ----

#[tokio::test(start_paused = true)]
async fn test_drains_points_in_order_then_eof() {
    init_tracing();
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::historic(&[10, 20, 30, 40, 50])),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.point_times(), vec![10, 20, 30, 40, 50]);
    assert!(sink.has_eof());
    assert!(fc.is_idle());

    let m = fc.metrics();
    assert_eq!(m.points_emitted, 5);
    assert_eq!(m.eofs_emitted, 1);
    assert_eq!(m.source_failures, 0);

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_batch_size_paces_draining() {
    let config = FlowControlConfig::default().with_batch_size(2);
    let mut fc = FlowControl::new(config);
    let sink = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::historic(&[1, 2, 3, 4, 5])),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Order is preserved across batches, and no pass exceeds the batch
    // size, so at least three batches were needed.
    assert_eq!(sink.point_times(), vec![1, 2, 3, 4, 5]);
    assert!(fc.metrics().batches_emitted >= 3);

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_live_source_ticks_at_interval() {
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::live_silent()),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // No data ever arrives, so the stream is ticks only, spaced by the
    // default tick interval from the read window's start.
    let ticks = sink.tick_times();
    assert!(ticks.len() >= 3, "expected ticks, got {ticks:?}");
    assert_eq!(&ticks[..3], &[200, 400, 600]);
    assert_eq!(sink.point_times(), Vec::<i64>::new());
    assert!(!sink.has_eof());

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_suspends_points_not_ticks() {
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    let handle = fc.backpressure_handle();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::live(&[10, 20, 30])),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();

    handle.suspend();
    assert!(handle.is_suspended());
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    // Points are held back while suspended; liveness ticks are not.
    assert_eq!(sink.point_times(), Vec::<i64>::new());
    assert!(!sink.tick_times().is_empty());
    assert!(fc.metrics().suspended_passes >= 1);

    handle.resume();
    assert!(!handle.is_suspended());
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.point_times(), vec![10, 20, 30]);
    assert!(sink.has_eof());

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_flush_ignores_suspension() {
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    let handle = fc.backpressure_handle();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::historic(&[1, 2, 3])),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();

    handle.suspend();
    fc.start().unwrap();

    // Let the Reader fill the queue; the Emitter may not drain it.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.point_times(), Vec::<i64>::new());

    fc.flush();
    assert_eq!(sink.point_times(), vec![1, 2, 3]);
    assert!(sink.has_eof());
    assert!(fc.is_idle());

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bounded_window_reaches_eof() {
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    let mut source = TestSource::historic(&[10, 20]);
    // The source reports its window fully read rather than end-of-stream.
    source.final_read_end = 100;
    fc.register_source(Pname(0), Box::new(source), Box::new(sink.clone()), 0, 100)
        .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.point_times(), vec![10, 20]);
    assert!(sink.has_eof());
    assert!(fc.is_idle());

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_source_tears_down_with_eof() {
    init_tracing();
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(FailSource),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    // The failure is counted and the downstream still sees a clean eof.
    assert_eq!(sink.point_times(), Vec::<i64>::new());
    assert!(sink.has_eof());
    assert_eq!(fc.metrics().source_failures, 1);
    assert!(fc.is_idle());

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_halts_emission() {
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::live_silent()),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!sink.tick_times().is_empty());

    fc.stop().unwrap();
    assert_eq!(fc.state(), SchedulerState::Stopped);

    let frozen = sink.len();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.len(), frozen);

    assert!(matches!(fc.stop(), Err(RuntimeError::NotRunning)));
}

#[tokio::test(start_paused = true)]
async fn test_register_guards() {
    let mut fc = FlowControl::new(FlowControlConfig::default());
    let sink = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::historic(&[1])),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();

    let err = fc
        .register_source(
            Pname(0),
            Box::new(TestSource::historic(&[2])),
            Box::new(sink.clone()),
            0,
            READ_END_EOF,
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::DuplicateSource(Pname(0))));

    fc.start().unwrap();
    let err = fc
        .register_source(
            Pname(1),
            Box::new(TestSource::historic(&[3])),
            Box::new(sink),
            0,
            READ_END_EOF,
        )
        .unwrap_err();
    assert!(matches!(err, RuntimeError::AlreadyRunning));

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_multiple_sources_drain_fairly() {
    let config = FlowControlConfig::default().with_batch_size(1);
    let mut fc = FlowControl::new(config);
    let s1 = CollectSink::default();
    let s2 = CollectSink::default();
    fc.register_source(
        Pname(0),
        Box::new(TestSource::historic(&[1, 2, 3])),
        Box::new(s1.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.register_source(
        Pname(1),
        Box::new(TestSource::historic(&[4, 5, 6])),
        Box::new(s2.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Every pass drains the same bounded batch from each source, so one
    // source never finishes far ahead of the other.
    assert_eq!(s1.point_times(), vec![1, 2, 3]);
    assert_eq!(s2.point_times(), vec![4, 5, 6]);
    assert!(s1.has_eof());
    assert!(s2.has_eof());
    assert!(fc.is_idle());

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_pauses_reader_until_drained() {
    let config = FlowControlConfig::default()
        .with_queue_capacity(2)
        .with_batch_size(2);
    let mut fc = FlowControl::new(config);
    let sink = CollectSink::default();
    let source = TestSource::historic(&[1, 2, 3, 4, 5, 6]);
    let limits = Arc::clone(&source.seen_limits);
    fc.register_source(
        Pname(0),
        Box::new(source),
        Box::new(sink.clone()),
        0,
        READ_END_EOF,
    )
    .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    // Everything arrives in order even though the queue holds at most
    // two points, which requires the reader to park on a full queue and
    // resume after each drain.
    assert_eq!(sink.point_times(), vec![1, 2, 3, 4, 5, 6]);
    assert!(sink.has_eof());

    // Each read was asked for no more than the queue's free capacity,
    // and refilling six points two at a time takes at least three reads.
    let limits = limits.lock().clone();
    assert!(limits.len() >= 3, "expected repeated reads, got {limits:?}");
    assert!(limits.iter().all(|&l| l >= 1 && l <= 2), "limits {limits:?}");

    fc.stop().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_registry_factories_drive_a_pipeline() {
    init_tracing();

    // Stage factories attached to the graph's own registry instantiate
    // both ends of the pipeline from their nodes.
    let mut registry = StageRegistry::builtin();
    registry.register_source_factory("read", Arc::new(|_node: &ProcNode| {
        Box::new(TestSource::historic(&[10, 20, 30])) as Box<dyn SourceStage>
    }));
    let sink = RecordingSink::default();
    let template = sink.clone();
    registry.register_sink_factory("view", Arc::new(move |_node: &ProcNode| {
        Box::new(template.clone()) as Box<dyn SinkStage>
    }));
    let registry = Arc::new(registry);

    let mut b = GraphBuilder::new(Arc::clone(&registry), 0);
    let read = b
        .add_proc(
            "read",
            Location::default(),
            vec![("to".to_string(), Expr::literal(Value::Time(100)))],
        )
        .unwrap();
    let view = b.add_proc("view", Location::default(), Vec::new()).unwrap();
    b.append(&read, &view).unwrap();
    let g = b.finish().unwrap();

    let read_node = g.node(read.nodes[0]).unwrap();
    let view_node = g.node(view.nodes[0]).unwrap();
    let stage = registry.make_source(read_node).unwrap();
    let sink_stage = registry.make_sink(view_node).unwrap();

    let mut fc = FlowControl::new(FlowControlConfig::default());
    fc.connect(read_node.pname, stage, sink_stage, 0, READ_END_EOF)
        .unwrap();
    fc.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.inner.point_times(), vec![10, 20, 30]);
    assert!(sink.inner.has_eof());
    // The sink got the scheduler's backpressure handle and exactly one
    // end-of-stream callback.
    assert!(sink.handle.lock().is_some());
    assert_eq!(sink.eof_calls.load(Ordering::SeqCst), 1);
    assert!(fc.is_idle());

    fc.stop().unwrap();
}

// ---- Order-enforcing fan-in ----

fn pt(t: i64) -> StreamItem {
    StreamItem::Point(Point::at(t))
}

#[test]
fn test_ordered_drops_out_of_order_points() {
    let sink = CollectSink::default();
    let mut ordered = Ordered::new(sink.clone(), OrderedConfig::time("time"));

    ordered.emit(vec![pt(1), pt(3), pt(5)]);
    ordered.emit(vec![pt(2), pt(4), pt(6)]);

    assert_eq!(sink.point_times(), vec![1, 3, 5, 6]);
    assert_eq!(ordered.watermark(), Some(6));
}

#[test]
fn test_ordered_drops_invalid_time_values() {
    let sink = CollectSink::default();
    let mut ordered = Ordered::new(sink.clone(), OrderedConfig::time("time"));

    let bad = Point::new().with("time", Value::String("not a time".into()));
    let missing = Point::new().with("host", Value::String("a".into()));
    ordered.emit(vec![
        StreamItem::Point(bad),
        StreamItem::Point(missing.clone()),
        pt(10),
    ]);

    // The malformed point is dropped; a point without the watched field
    // passes untouched.
    let items = sink.items.lock();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0], StreamItem::Point(missing));
    drop(items);
    assert_eq!(ordered.watermark(), Some(10));
}

#[test]
fn test_ordered_rewrites_ticks_to_watermark() {
    let sink = CollectSink::default();
    let mut ordered = Ordered::new(sink.clone(), OrderedConfig::time("time"));

    // Before any point has passed there is nothing to rewrite to.
    ordered.emit(vec![StreamItem::Tick(7)]);
    ordered.emit(vec![pt(100), StreamItem::Tick(5)]);

    assert_eq!(sink.tick_times(), vec![7, 100]);
}

#[test]
fn test_ordered_marks_follow_monotonicity() {
    let sink = CollectSink::default();
    let mut ordered = Ordered::new(sink.clone(), OrderedConfig::time("time"));

    ordered.emit(vec![pt(100)]);
    ordered.emit(vec![StreamItem::Mark(50)]);
    ordered.emit(vec![StreamItem::Mark(200)]);
    // The mark advanced the watermark, so this point is now late.
    ordered.emit(vec![pt(150)]);

    let marks: Vec<i64> = sink
        .items
        .lock()
        .iter()
        .filter_map(|i| match i {
            StreamItem::Mark(t) => Some(*t),
            _ => None,
        })
        .collect();
    assert_eq!(marks, vec![200]);
    assert_eq!(sink.point_times(), vec![100]);
    assert_eq!(ordered.watermark(), Some(200));
}

#[test]
fn test_ordered_validates_intervals() {
    let sink = CollectSink::default();
    let config = OrderedConfig::time("time").with_interval("interval");
    let mut ordered = Ordered::new(sink.clone(), config);

    let good = Point::at(1).with("interval", Value::Duration(10));
    let zero = Point::at(2).with("interval", Value::Duration(0));
    let negative = Point::at(3).with("interval", Value::Duration(-5));
    let wrong_type = Point::at(4).with("interval", Value::Number(10.0));
    let absent = Point::at(5);

    ordered.emit(
        [good, zero, negative, wrong_type, absent]
            .into_iter()
            .map(StreamItem::Point)
            .collect(),
    );

    assert_eq!(sink.point_times(), vec![1, 5]);
}

#[test]
fn test_ordered_rejected_point_leaves_watermark_untouched() {
    let sink = CollectSink::default();
    let config = OrderedConfig::time("time").with_interval("interval");
    let mut ordered = Ordered::new(sink.clone(), config);

    ordered.emit(vec![pt(1)]);
    // Dropped for its interval; its (much later) time must not poison
    // the watermark.
    let bad = Point::at(100).with("interval", Value::Duration(0));
    ordered.emit(vec![StreamItem::Point(bad)]);
    ordered.emit(vec![pt(50)]);

    assert_eq!(sink.point_times(), vec![1, 50]);
    assert_eq!(ordered.watermark(), Some(50));
}

#[test]
fn test_ordered_without_config_passes_everything() {
    let sink = CollectSink::default();
    let mut ordered = Ordered::new(sink.clone(), OrderedConfig::default());

    ordered.emit(vec![pt(5), pt(1), StreamItem::Mark(0), StreamItem::Eof]);

    assert_eq!(sink.point_times(), vec![5, 1]);
    assert_eq!(sink.len(), 4);
    assert!(sink.has_eof());
    assert_eq!(ordered.watermark(), None);
}

#[test]
fn test_ordered_eof_passes() {
    let sink = CollectSink::default();
    let mut ordered = Ordered::new(sink.clone(), OrderedConfig::time("time"));
    ordered.emit(vec![StreamItem::Eof]);
    assert!(sink.has_eof());
}
