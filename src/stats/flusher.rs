//! Asynchronous persistence of completed batches.
//!
//! Every batch is written on its own blocking task: first the CSV, then the
//! chart. A failure of one artifact does not prevent the other and never
//! reaches the aggregator that produced the batch.

use super::{write_csv, Batch, BatchSink, ChartRenderer, FlushError};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

/// Where one batch ended up on disk.
#[derive(Debug)]
pub struct Persisted {
    pub csv: Result<PathBuf, FlushError>,
    pub chart: Result<PathBuf, FlushError>,
}

/// Writes batches under `<root>/<target-slug>/{stats,charts}/`.
pub struct Flusher {
    root: PathBuf,
    chart: Arc<dyn ChartRenderer>,
    tracker: TaskTracker,
    runtime: Handle,
}

impl Flusher {
    /// Flusher running its writes on the current tokio runtime.
    pub fn new(root: impl Into<PathBuf>, chart: Arc<dyn ChartRenderer>) -> Result<Self, FlushError> {
        let runtime = Handle::try_current().map_err(|_| FlushError::NoRuntime)?;
        Ok(Self {
            root: root.into(),
            chart,
            tracker: TaskTracker::new(),
            runtime,
        })
    }

    /// Flushes started but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait up to `grace` for in-flight flushes. Returns false if some were
    /// still running when the grace period ended.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let done = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        done
    }
}

impl BatchSink for Flusher {
    fn submit(&self, batch: Batch) {
        if batch.is_empty() {
            tracing::debug!("{}: skipping empty batch", batch.target);
            return;
        }

        let root = self.root.clone();
        let chart = self.chart.clone();
        self.tracker.spawn_blocking_on(
            move || {
                let persisted = persist(&root, chart.as_ref(), &batch);
                match &persisted.csv {
                    Ok(path) => tracing::info!(
                        "{}: wrote {} samples to {}",
                        batch.target,
                        batch.aligned_len(),
                        path.display()
                    ),
                    Err(e) => tracing::warn!("{}: lost batch csv: {}", batch.target, e),
                }
                if let Err(e) = &persisted.chart {
                    tracing::warn!("{}: chart not written: {}", batch.target, e);
                }
            },
            &self.runtime,
        );
    }
}

/// Write the CSV and chart for one batch.
pub fn persist(root: &Path, chart: &dyn ChartRenderer, batch: &Batch) -> Persisted {
    let stamp = batch.stamp();
    let base = root.join(&batch.slug);

    let csv = artifact_path(&base.join("stats"), &stamp, "csv")
        .and_then(|path| write_csv(&path, batch).map(|_| path));

    let chart = artifact_path(&base.join("charts"), &stamp, chart.extension()).and_then(|path| {
        let doc = chart.render(batch)?;
        create_new(&path, doc.as_bytes())?;
        Ok(path)
    });

    Persisted { csv, chart }
}

fn artifact_path(dir: &Path, stamp: &str, ext: &str) -> Result<PathBuf, FlushError> {
    fs::create_dir_all(dir).map_err(FlushError::io(dir))?;
    Ok(dir.join(format!("{}.{}", stamp, ext)))
}

fn create_new(path: &Path, contents: &[u8]) -> Result<(), FlushError> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(FlushError::io(path))?;
    file.write_all(contents)
        .and_then(|_| file.sync_all())
        .map_err(FlushError::io(path))
}
