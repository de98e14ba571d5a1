//! Per-target sample buffers cut into fixed-size batches.

use super::{AggregateError, Batch};
use crate::config::FlushTrigger;
use crate::models::{PingResult, Target};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Receives completed batches. Called outside the aggregator lock.
pub trait BatchSink: Send + Sync {
    fn submit(&self, batch: Batch);
}

/// Live buffers of one target, one per metric.
struct HostStats {
    started: DateTime<Utc>,
    buffers: Vec<Vec<Duration>>,
}

impl HostStats {
    fn new(metrics: usize, capacity: usize) -> Self {
        Self {
            started: Utc::now(),
            buffers: (0..metrics).map(|_| Vec::with_capacity(capacity)).collect(),
        }
    }
}

/// Collects samples for one target and hands full batches to a sink.
pub struct Aggregator {
    target: String,
    slug: String,
    metrics: &'static [&'static str],
    primary: usize,
    capacity: usize,
    trigger: FlushTrigger,
    stats: Mutex<Option<HostStats>>,
    sink: Arc<dyn BatchSink>,
    appended: AtomicU64,
    batches: AtomicU64,
}

impl Aggregator {
    pub fn new(
        target: &Target,
        capacity: usize,
        trigger: FlushTrigger,
        sink: Arc<dyn BatchSink>,
    ) -> Self {
        let metrics = target.scheme.metrics();
        let primary = target.scheme.primary_metric();
        Self {
            target: target.name(),
            slug: target.slug(),
            metrics,
            primary: metrics.iter().position(|m| *m == primary).unwrap_or(0),
            capacity: capacity.max(1),
            trigger,
            stats: Mutex::new(None),
            sink,
            appended: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add one sample to the named metric's buffer.
    pub fn append(&self, metric: &str, value: Duration) -> Result<(), AggregateError> {
        let idx = self
            .metrics
            .iter()
            .position(|m| *m == metric)
            .ok_or_else(|| AggregateError::UnknownMetric {
                target: self.target.clone(),
                metric: metric.to_string(),
            })?;

        let cut = {
            let mut guard = self.lock();
            let stats = guard.get_or_insert_with(|| HostStats::new(self.metrics.len(), self.capacity));
            let mut cut: Vec<Batch> = self.cut_before(stats, &[idx]).into_iter().collect();
            stats.buffers[idx].push(value);
            cut.extend(self.cut_after(stats));
            cut
        };

        self.appended.fetch_add(1, Ordering::Relaxed);
        self.submit(cut);
        Ok(())
    }

    /// Add every metric of one result under a single lock acquisition.
    pub fn record(&self, result: &PingResult) -> Result<(), AggregateError> {
        let values: Vec<(usize, Duration)> = self
            .metrics
            .iter()
            .enumerate()
            .filter_map(|(i, m)| result.value(m).map(|v| (i, v)))
            .collect();
        if values.is_empty() {
            return Err(AggregateError::MismatchedResult {
                target: self.target.clone(),
            });
        }

        let cut = {
            let mut guard = self.lock();
            let stats = guard.get_or_insert_with(|| HostStats::new(self.metrics.len(), self.capacity));
            let touched: Vec<usize> = values.iter().map(|(i, _)| *i).collect();
            let mut cut: Vec<Batch> = self.cut_before(stats, &touched).into_iter().collect();
            for (i, v) in &values {
                stats.buffers[*i].push(*v);
            }
            cut.extend(self.cut_after(stats));
            cut
        };

        self.appended.fetch_add(values.len() as u64, Ordering::Relaxed);
        self.submit(cut);
        Ok(())
    }

    /// Take whatever is buffered as a final, possibly short, batch.
    pub fn drain(&self) -> Option<Batch> {
        let mut guard = self.lock();
        let stats = guard.as_mut()?;
        if stats.buffers.iter().all(Vec::is_empty) {
            return None;
        }
        Some(self.cut(stats))
    }

    /// Samples waiting in the primary buffer.
    pub fn pending(&self) -> usize {
        self.lock()
            .as_ref()
            .map_or(0, |s| s.buffers[self.primary].len())
    }

    /// Total samples accepted since creation.
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Batches cut since creation.
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Option<HostStats>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A buffer at capacity is swapped out before it can grow.
    fn cut_before(&self, stats: &mut HostStats, touched: &[usize]) -> Option<Batch> {
        let primary_full = stats.buffers[self.primary].len() >= self.capacity;
        let any_full = touched.iter().any(|i| stats.buffers[*i].len() >= self.capacity);
        match self.trigger {
            FlushTrigger::OnNextAppend if primary_full || any_full => Some(self.cut(stats)),
            FlushTrigger::OnFull if any_full => Some(self.cut(stats)),
            _ => None,
        }
    }

    fn cut_after(&self, stats: &mut HostStats) -> Option<Batch> {
        match self.trigger {
            FlushTrigger::OnFull if stats.buffers[self.primary].len() >= self.capacity => {
                Some(self.cut(stats))
            }
            _ => None,
        }
    }

    /// Swap the live buffers for fresh ones of the same capacity.
    fn cut(&self, stats: &mut HostStats) -> Batch {
        let fresh = HostStats::new(self.metrics.len(), self.capacity);
        let old = std::mem::replace(stats, fresh);
        self.batches.fetch_add(1, Ordering::Relaxed);
        Batch {
            target: self.target.clone(),
            slug: self.slug.clone(),
            started: old.started,
            metrics: self.metrics.to_vec(),
            columns: old.buffers,
        }
    }

    fn submit(&self, cut: Vec<Batch>) {
        for batch in cut {
            tracing::debug!("{}: batch of {} samples ready", self.target, batch.aligned_len());
            self.sink.submit(batch);
        }
    }
}
