//! The flow-control scheduler.
//!
//! One scheduler instance drives one running program. It owns an explicit
//! map from source identity to queue/watermark state and runs two roles:
//!
//! - **Reader** (one task per source, paced by the source's own
//!   asynchronous read completions): fills each queue up to capacity,
//!   pausing while the queue is full and resuming when the Emitter
//!   drains it.
//! - **Emitter** (a single serialized pass per scheduling interval): for
//!   every source, emits any due liveness ticks and then drains up to a
//!   batch of points downstream, recording the source's watermark.
//!
//! Draining is interval-fair across sources: every registered source is
//! drained by the same bounded batch each interval, and tick emission is
//! checked for every source before any draining, so no source's watermark
//! outruns the others by more than one interval's worth of ticks. Sinks
//! suspend and resume draining through [`BackpressureHandle`]; ticks
//! still fire while draining is suspended, so liveness is never starved.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::graph::node::Pname;
use crate::point::StreamItem;
use crate::runtime::error::RuntimeError;
use crate::runtime::queue::SourceQueue;
use crate::runtime::stage::{Downstream, ReadRequest, SinkStage, SourceStage};

/// Default scheduling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Default number of points drained per source per interval.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Default per-source queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20_000;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct FlowControlConfig {
    /// Wall-clock interval between Emitter passes.
    pub interval: Duration,
    /// Maximum points drained per source per pass (a full flush ignores
    /// this).
    pub batch_size: usize,
    /// Per-source queue capacity; a full queue pauses that source's
    /// Reader until the Emitter drains it.
    pub queue_capacity: usize,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl FlowControlConfig {
    /// Sets the scheduling interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the per-source drain batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the per-source queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }
}

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// Not running; sources may be registered.
    #[default]
    Stopped,
    /// Reader and Emitter roles are active.
    Running,
}

/// Counters updated by the Emitter role.
#[derive(Debug, Clone, Default)]
pub struct FlowControlMetrics {
    /// Total points emitted downstream.
    pub points_emitted: u64,
    /// Total liveness ticks emitted.
    pub ticks_emitted: u64,
    /// Total non-empty point batches emitted.
    pub batches_emitted: u64,
    /// Total end-of-stream signals emitted.
    pub eofs_emitted: u64,
    /// Emitter passes skipped for draining because a sink had suspended.
    pub suspended_passes: u64,
    /// Sources that signalled a fatal read error.
    pub source_failures: u64,
}

impl FlowControlMetrics {
    fn absorb(&mut self, delta: &Self) {
        self.points_emitted += delta.points_emitted;
        self.ticks_emitted += delta.ticks_emitted;
        self.batches_emitted += delta.batches_emitted;
        self.eofs_emitted += delta.eofs_emitted;
        self.suspended_passes += delta.suspended_passes;
        self.source_failures += delta.source_failures;
    }
}

/// Sink-driven suspend/resume control, handed to sinks at attach time.
///
/// A sink tracks its own outstanding point count; once it exceeds the
/// sink's threshold the sink calls [`suspend`](Self::suspend), and calls
/// [`resume`](Self::resume) when the backlog falls back under it.
/// Suspension stops point draining across all sources; reading and
/// ticking continue.
#[derive(Clone)]
pub struct BackpressureHandle {
    shared: Arc<Shared>,
}

impl BackpressureHandle {
    /// Suspends draining. Calls nest: each `suspend` must be matched by a
    /// `resume`.
    pub fn suspend(&self) {
        self.shared.suspended.fetch_add(1, Ordering::AcqRel);
    }

    /// Resumes draining once all suspensions are released.
    pub fn resume(&self) {
        let _ = self
            .shared
            .suspended
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                n.checked_sub(1)
            });
    }

    /// True while any sink holds a suspension.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire) > 0
    }
}

impl std::fmt::Debug for BackpressureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureHandle")
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

/// One registered source's runtime state.
struct SourceEntry {
    pname: Pname,
    queue: Arc<Mutex<SourceQueue>>,
    /// Wakes the Reader after the Emitter drains a full queue.
    space: Arc<Notify>,
    live: bool,
    tick_every: Duration,
    /// Shared so an Emitter pass can release the entry list before
    /// calling into collaborator code.
    downstream: Arc<Mutex<Box<dyn Downstream>>>,
}

/// State shared between the scheduler handle, the Emitter task, and
/// backpressure handles.
struct Shared {
    entries: Mutex<Vec<SourceEntry>>,
    /// Serializes Emitter passes (the interval task and explicit
    /// `flush` calls) so per-source emission order is preserved.
    pass: Mutex<()>,
    suspended: AtomicUsize,
    metrics: Mutex<FlowControlMetrics>,
}

/// Routes a stream into a sink stage: forwards batches and translates
/// the end-of-stream item into the sink's `eof` callback.
struct SinkDownstream {
    sink: Box<dyn SinkStage>,
}

impl Downstream for SinkDownstream {
    fn emit(&mut self, items: Vec<StreamItem>) {
        let at_end = items.iter().any(|i| matches!(i, StreamItem::Eof));
        self.sink.emit(items);
        if at_end {
            self.sink.eof();
        }
    }
}

/// A source registered before `start()`.
struct PendingSource {
    pname: Pname,
    stage: Box<dyn SourceStage>,
    downstream: Box<dyn Downstream>,
    from: i64,
    to: i64,
}

/// The runtime flow-control scheduler for one program execution.
pub struct FlowControl {
    config: FlowControlConfig,
    shared: Arc<Shared>,
    state: SchedulerState,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
    pending: Vec<PendingSource>,
}

impl FlowControl {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(config: FlowControlConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                entries: Mutex::new(Vec::new()),
                pass: Mutex::new(()),
                suspended: AtomicUsize::new(0),
                metrics: Mutex::new(FlowControlMetrics::default()),
            }),
            state: SchedulerState::Stopped,
            shutdown: None,
            tasks: Vec::new(),
            pending: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// A backpressure handle for attaching to sinks.
    #[must_use]
    pub fn backpressure_handle(&self) -> BackpressureHandle {
        BackpressureHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// A snapshot of the Emitter counters.
    #[must_use]
    pub fn metrics(&self) -> FlowControlMetrics {
        self.shared.metrics.lock().clone()
    }

    /// True once every source has reached end-of-stream and drained.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.shared.entries.lock().is_empty()
    }

    /// Registers a source stage with its downstream consumer and the time
    /// window to read. `to` of [`crate::runtime::READ_END_EOF`] means
    /// unbounded (live).
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyRunning`] if called after `start()`
    /// and [`RuntimeError::DuplicateSource`] for a repeated pname.
    pub fn register_source(
        &mut self,
        pname: Pname,
        stage: Box<dyn SourceStage>,
        downstream: Box<dyn Downstream>,
        from: i64,
        to: i64,
    ) -> Result<(), RuntimeError> {
        if self.state == SchedulerState::Running {
            return Err(RuntimeError::AlreadyRunning);
        }
        if self.pending.iter().any(|p| p.pname == pname) {
            return Err(RuntimeError::DuplicateSource(pname));
        }
        self.pending.push(PendingSource {
            pname,
            stage,
            downstream,
            from,
            to,
        });
        Ok(())
    }

    /// Registers a source stage whose downstream is a sink stage, as
    /// instantiated by the registry factories. The sink is handed this
    /// scheduler's backpressure handle and receives `eof` when the
    /// source reaches end-of-stream.
    ///
    /// # Errors
    ///
    /// Same conditions as [`register_source`](Self::register_source).
    pub fn connect(
        &mut self,
        pname: Pname,
        stage: Box<dyn SourceStage>,
        mut sink: Box<dyn SinkStage>,
        from: i64,
        to: i64,
    ) -> Result<(), RuntimeError> {
        sink.attach(self.backpressure_handle());
        self.register_source(pname, stage, Box::new(SinkDownstream { sink }), from, to)
    }

    /// Starts the scheduler: creates per-source queues, spawns one Reader
    /// task per source and the Emitter task.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::AlreadyRunning`] if already running.
    pub fn start(&mut self) -> Result<(), RuntimeError> {
        if self.state == SchedulerState::Running {
            return Err(RuntimeError::AlreadyRunning);
        }

        let (tx, rx) = watch::channel(false);

        for src in self.pending.drain(..) {
            let tick_every = src.stage.tick_every();
            let live = src.stage.wants_live();
            let queue = Arc::new(Mutex::new(SourceQueue::new(
                self.config.queue_capacity,
                src.from,
                Instant::now() + tick_every,
            )));
            let space = Arc::new(Notify::new());

            self.shared.entries.lock().push(SourceEntry {
                pname: src.pname,
                queue: Arc::clone(&queue),
                space: Arc::clone(&space),
                live,
                tick_every,
                downstream: Arc::new(Mutex::new(src.downstream)),
            });

            debug!(pname = %src.pname, live, "starting source reader");
            self.tasks.push(tokio::spawn(run_reader(
                src.pname,
                src.stage,
                queue,
                space,
                src.from,
                src.to,
                self.config.interval,
                rx.clone(),
            )));
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        self.tasks.push(tokio::spawn(run_emitter(shared, config, rx)));

        self.shutdown = Some(tx);
        self.state = SchedulerState::Running;
        Ok(())
    }

    /// Drains every queue completely, ignoring the batch size, in one
    /// synchronous pass. Suspension does not block an explicit flush.
    ///
    /// Passes are serialized, so this must not be called from within a
    /// sink's emit path; sinks pace the scheduler through their
    /// [`BackpressureHandle`] instead.
    pub fn flush(&self) {
        emitter_pass(&self.shared, usize::MAX, true);
    }

    /// Stops the scheduler: cancels the interval timer and the per-source
    /// Reader tasks. Remaining queued points are not flushed; callers
    /// needing a full flush must call [`flush`](Self::flush) first.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotRunning`] if the scheduler is stopped.
    pub fn stop(&mut self) -> Result<(), RuntimeError> {
        if self.state != SchedulerState::Running {
            return Err(RuntimeError::NotRunning);
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state = SchedulerState::Stopped;
        Ok(())
    }
}

impl std::fmt::Debug for FlowControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowControl")
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .field("sources", &self.shared.entries.lock().len())
            .finish_non_exhaustive()
    }
}

/// Reader role: fills one source's queue from its asynchronous reads.
#[allow(clippy::too_many_arguments)]
async fn run_reader(
    pname: Pname,
    mut stage: Box<dyn SourceStage>,
    queue: Arc<Mutex<SourceQueue>>,
    space: Arc<Notify>,
    from: i64,
    to: i64,
    backoff: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut cursor = from;
    let mut state: Option<String> = None;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let limit = queue.lock().available();
        if limit == 0 {
            // At capacity: not re-read until the Emitter drains it.
            tokio::select! {
                () = space.notified() => {}
                _ = shutdown.changed() => break,
            }
            continue;
        }

        let req = ReadRequest {
            from: cursor,
            to,
            limit,
            state: state.take(),
        };
        let result = tokio::select! {
            r = stage.read(req) => r,
            _ = shutdown.changed() => break,
        };

        match result {
            Ok(res) => {
                let got = res.points.len();
                let progressed = res.read_end > cursor;
                queue.lock().append(res.points);
                state = res.state;
                cursor = cursor.max(res.read_end);

                if cursor >= to {
                    queue.lock().set_eof();
                    break;
                }
                if got == 0 && !progressed {
                    // No data and no progress: back off one interval
                    // rather than spinning on the source.
                    tokio::select! {
                        () = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
            Err(err) => {
                warn!(%pname, error = %err, "source read failed; stopping source");
                queue.lock().fail();
                break;
            }
        }
    }
}

/// Emitter role: one serialized pass per scheduling interval.
async fn run_emitter(
    shared: Arc<Shared>,
    config: FlowControlConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = interval.tick() => emitter_pass(&shared, config.batch_size, false),
            _ = shutdown.changed() => break,
        }
    }
}

/// One Emitter pass over every registered source: due ticks first (for
/// all sources, even while suspended), then a bounded drain per source,
/// then teardown of queues that reached end-of-stream empty.
///
/// The entry list, queue, and metrics locks are released before any
/// downstream `emit` runs, so collaborator code never executes under a
/// scheduler data lock. Passes themselves are serialized by a dedicated
/// lock to keep per-source emission order intact when an explicit flush
/// races the interval timer.
fn emitter_pass(shared: &Shared, batch_size: usize, flush: bool) {
    let _serialized = shared.pass.lock();

    let suspended = shared.suspended.load(Ordering::Acquire) > 0;
    let now = Instant::now();
    let mut delta = FlowControlMetrics::default();
    if suspended && !flush {
        delta.suspended_passes += 1;
    }

    // Phase 1: collect each source's due items under the data locks.
    type Emission = (Arc<Mutex<Box<dyn Downstream>>>, Vec<StreamItem>);
    let mut emissions: Vec<Emission> = Vec::new();
    {
        let mut entries = shared.entries.lock();
        entries.retain_mut(|entry| {
            let mut queue = entry.queue.lock();
            let mut items: Vec<StreamItem> = Vec::new();

            // Liveness ticks are never starved, suspension or not.
            if entry.live {
                while now >= queue.next_tick() {
                    items.push(StreamItem::Tick(queue.take_tick(entry.tick_every)));
                    delta.ticks_emitted += 1;
                }
            }

            if !suspended || flush {
                let points = queue.drain(batch_size);
                if !points.is_empty() {
                    entry.space.notify_one();
                    delta.points_emitted += points.len() as u64;
                    delta.batches_emitted += 1;
                    items.extend(points.into_iter().map(StreamItem::Point));
                }
            }

            let done = queue.is_eof() && queue.is_empty();
            if done {
                if queue.is_failed() {
                    delta.source_failures += 1;
                }
                debug!(pname = %entry.pname, "source reached end-of-stream");
                items.push(StreamItem::Eof);
                delta.eofs_emitted += 1;
            }
            drop(queue);

            if !items.is_empty() {
                emissions.push((Arc::clone(&entry.downstream), items));
            }
            !done
        });
    }

    shared.metrics.lock().absorb(&delta);

    // Phase 2: push downstream with only the per-sink lock held.
    for (downstream, items) in emissions {
        downstream.lock().emit(items);
    }
}
