//! Minimal metrics seam. The distilled spec names concrete counters and
//! histograms (`reddit.api.errors`, `reddit.api.ratelimit`, queue latency,
//! row-count gauges) without committing to a metrics backend, and the
//! example pack carries no StatsD-compatible crate. `Metrics` is the trait
//! boundary those call sites are written against; `TracingMetrics` is the
//! default implementation, which emits structured `tracing` events so the
//! numbers still show up in logs without pulling in a concrete exporter.

use std::fmt;
use std::time::Duration;

pub trait Metrics: fmt::Debug + Send + Sync {
    fn incr(&self, name: &'static str, tags: &[(&'static str, &str)]);
    fn gauge(&self, name: &'static str, value: i64, tags: &[(&'static str, &str)]);
    fn histogram(&self, name: &'static str, value: Duration, tags: &[(&'static str, &str)]);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl Metrics for TracingMetrics {
    fn incr(&self, name: &'static str, tags: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, ?tags, "counter");
    }

    fn gauge(&self, name: &'static str, value: i64, tags: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, value, ?tags, "gauge");
    }

    fn histogram(&self, name: &'static str, value: Duration, tags: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, value_ms = value.as_millis() as u64, ?tags, "histogram");
    }
}
