//! CSV rendering of a batch: one column per metric, integer nanoseconds.

use super::{Batch, FlushError};

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write `batch` to a new file at `path`, failing if it already exists.
pub fn write_csv(path: &Path, batch: &Batch) -> Result<(), FlushError> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(FlushError::io(path))?;

    let mut w = BufWriter::new(file);
    write_rows(&mut w, batch).map_err(FlushError::io(path))?;
    w.into_inner()
        .map_err(|e| e.into_error())
        .and_then(|f| f.sync_all())
        .map_err(FlushError::io(path))
}

fn write_rows<W: Write>(w: &mut W, batch: &Batch) -> std::io::Result<()> {
    writeln!(w, "{}", batch.metrics.join(","))?;

    let columns: Vec<_> = (0..batch.metrics.len()).map(|i| batch.column(i)).collect();
    for row in 0..batch.aligned_len() {
        let line = columns
            .iter()
            .map(|c| c[row].as_nanos().to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(w, "{}", line)?;
    }
    w.flush()
}
