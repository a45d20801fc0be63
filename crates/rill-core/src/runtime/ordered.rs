//! Order-enforcing fan-in decorator.
//!
//! Wraps the downstream side of any stage that merges multiple inputs
//! into one output stream and guarantees the scheduler's ordering
//! contract holds even when upstream misbehaves. Its failure mode is
//! always "drop the offending item and warn": a single malformed point
//! must not halt an otherwise-healthy long-running stream, so this
//! component never raises a fatal error.

use tracing::warn;

use crate::point::{Point, StreamItem};
use crate::runtime::queue::WATERMARK_UNSET;
use crate::runtime::stage::Downstream;

/// Which output fields the decorator watches.
#[derive(Debug, Clone, Default)]
pub struct OrderedConfig {
    /// Field that must hold a valid, non-decreasing time value.
    pub time_field: Option<String>,
    /// Field that must hold a valid, positive duration.
    pub interval_field: Option<String>,
}

impl OrderedConfig {
    /// Watches a time field.
    #[must_use]
    pub fn time(field: impl Into<String>) -> Self {
        Self {
            time_field: Some(field.into()),
            interval_field: None,
        }
    }

    /// Additionally watches an interval field.
    #[must_use]
    pub fn with_interval(mut self, field: impl Into<String>) -> Self {
        self.interval_field = Some(field.into());
        self
    }
}

/// Decorator enforcing monotonic output ordering around a merge stage.
#[derive(Debug)]
pub struct Ordered<D: Downstream> {
    inner: D,
    config: OrderedConfig,
    /// Timestamp of the last item successfully emitted.
    last_time: i64,
}

impl<D: Downstream> Ordered<D> {
    /// Wraps a downstream consumer.
    #[must_use]
    pub fn new(inner: D, config: OrderedConfig) -> Self {
        Self {
            inner,
            config,
            last_time: WATERMARK_UNSET,
        }
    }

    /// The last known-good watermark, if any item has passed.
    #[must_use]
    pub fn watermark(&self) -> Option<i64> {
        (self.last_time != WATERMARK_UNSET).then_some(self.last_time)
    }

    /// Consumes the decorator, returning the wrapped consumer.
    #[must_use]
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Validates one batch, dropping violations (with a warning) and
    /// rewriting ticks to the last known-good watermark.
    pub fn filter(&mut self, items: Vec<StreamItem>) -> Vec<StreamItem> {
        let mut kept = Vec::with_capacity(items.len());
        for item in items {
            match item {
                StreamItem::Point(p) => {
                    if self.admit_point(&p) {
                        kept.push(StreamItem::Point(p));
                    }
                }
                StreamItem::Mark(t) => {
                    // Marks get the same monotonicity check as points.
                    if self.config.time_field.is_none() {
                        kept.push(StreamItem::Mark(t));
                    } else if self.last_time != WATERMARK_UNSET && t < self.last_time {
                        warn!(
                            mark = t,
                            last = self.last_time,
                            "dropping mark: time out of order"
                        );
                    } else {
                        if t > self.last_time {
                            self.last_time = t;
                        }
                        kept.push(StreamItem::Mark(t));
                    }
                }
                StreamItem::Tick(t) => {
                    // There is no principled way to correct a tick's
                    // time: rewrite it to the last known-good watermark.
                    let t = if self.last_time == WATERMARK_UNSET {
                        t
                    } else {
                        self.last_time
                    };
                    kept.push(StreamItem::Tick(t));
                }
                StreamItem::Eof => kept.push(StreamItem::Eof),
            }
        }
        kept
    }

    /// Runs every validation before touching `last_time`: a point that
    /// fails any check must leave the watermark exactly where the last
    /// successfully emitted point put it.
    fn admit_point(&mut self, point: &Point) -> bool {
        let mut advance = None;
        if let Some(field) = &self.config.time_field {
            if let Some(value) = point.get(field) {
                let Some(t) = value.as_time() else {
                    warn!(field = %field, value = %value, "dropping point: invalid time value");
                    return false;
                };
                if self.last_time != WATERMARK_UNSET && t < self.last_time {
                    warn!(
                        field = %field,
                        time = t,
                        last = self.last_time,
                        "dropping point: time out of order"
                    );
                    return false;
                }
                advance = Some(t);
            }
        }

        if let Some(field) = &self.config.interval_field {
            if let Some(value) = point.get(field) {
                match value.as_duration() {
                    None => {
                        warn!(field = %field, value = %value, "dropping point: invalid interval value");
                        return false;
                    }
                    Some(d) if d <= 0 => {
                        warn!(field = %field, interval = d, "dropping point: non-positive interval");
                        return false;
                    }
                    Some(_) => {}
                }
            }
        }

        if let Some(t) = advance {
            self.last_time = t;
        }
        true
    }
}

impl<D: Downstream> Downstream for Ordered<D> {
    fn emit(&mut self, items: Vec<StreamItem>) {
        let kept = self.filter(items);
        if !kept.is_empty() {
            self.inner.emit(kept);
        }
    }
}