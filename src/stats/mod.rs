//! Per-target sample buffering and batch persistence.
//!
//! An [`Aggregator`] collects samples for one target and cuts them into
//! [`Batch`]es; a [`Flusher`] writes each batch as a CSV file and an HTML
//! chart outside of any lock.

mod aggregator;
mod chart;
mod csv;
mod flusher;

pub use aggregator::*;
pub use chart::*;
pub use csv::*;
pub use flusher::*;

use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors from recording samples.
#[derive(Error, Debug, PartialEq)]
pub enum AggregateError {
    #[error("{target}: unknown metric '{metric}'")]
    UnknownMetric { target: String, metric: String },
    #[error("{target}: result carries none of the target's metrics")]
    MismatchedResult { target: String },
}

/// Errors from persisting a batch.
#[derive(Error, Debug)]
pub enum FlushError {
    #[error("{path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Chart(#[from] ChartError),
    #[error("no tokio runtime to run flushes on")]
    NoRuntime,
}

impl FlushError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> FlushError {
        let path = path.into();
        move |source| FlushError::Io { path, source }
    }
}

/// Snapshot of one target's buffers, cut when a batch is complete.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Target name, e.g. `https:example.com:443`.
    pub target: String,
    /// Filesystem-safe target name.
    pub slug: String,
    /// When the first sample of this batch could have been recorded.
    pub started: DateTime<Utc>,
    /// Metric names in column order.
    pub metrics: Vec<&'static str>,
    /// One column per metric.
    pub columns: Vec<Vec<Duration>>,
}

impl Batch {
    /// Rows valid for every column: the shortest column's length.
    pub fn aligned_len(&self) -> usize {
        self.columns.iter().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.aligned_len() == 0
    }

    /// Column `i` truncated to the aligned length.
    pub fn column(&self, i: usize) -> &[Duration] {
        let n = self.aligned_len();
        self.columns.get(i).map_or(&[][..], |c| &c[..n])
    }

    /// Artifact file stem, e.g. `20240102-030405.678`.
    pub fn stamp(&self) -> String {
        self.started.format("%Y%m%d-%H%M%S%.3f").to_string()
    }
}
