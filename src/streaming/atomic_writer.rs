//! Atomic CSV file writer with automatic cleanup on failure.
//!
//! Pair-count files and the final report are written through this type.
//! Rows go to a temporary file in the same directory as the destination,
//! which atomically replaces the destination on `finish()`. A writer dropped
//! before finishing removes its temporary file, so a reader never observes a
//! half-written pair-count file or report.

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use csv::{Terminator, Writer, WriterBuilder};
use serde::Serialize;
use tempfile::{Builder, NamedTempFile};

use super::basket_chunker::{CHUNK_PREFIX, TEMP_SUFFIX};
use crate::error::PipelineError;

/// An atomic CSV writer that ensures data integrity.
pub struct AtomicCsvWriter {
    writer: Writer<BufWriter<NamedTempFile>>,
    final_path: PathBuf,
    rows: u64,
}

impl AtomicCsvWriter {
    /// Creates a new atomic CSV writer targeting the specified path.
    ///
    /// The temporary file is created in the same directory as `final_path`
    /// so the final rename stays on one filesystem. It is named
    /// `subdata_XXXXXX.tmp` so a sweep of stale intermediates also catches
    /// temporaries left by a killed run. Headers are never written
    /// implicitly; use [`write_header`](Self::write_header) when one is needed.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Io` if the parent directory cannot be
    /// determined or the temporary file cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if p.as_os_str().is_empty() => Path::new("."),
            Some(p) => p,
            None => {
                return Err(PipelineError::Io(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        let temp_file = Builder::new()
            .prefix(CHUNK_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(parent_dir)
            .map_err(|e| PipelineError::Io(format!("Failed to create temporary file: {}", e)))?;

        let writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(BufWriter::new(temp_file));

        Ok(Self {
            writer,
            final_path,
            rows: 0,
        })
    }

    /// Writes a header row. Not counted in [`rows`](Self::rows).
    pub fn write_header(&mut self, header: &[&str]) -> Result<(), PipelineError> {
        self.writer
            .write_record(header)
            .map_err(|e| PipelineError::Io(format!("Failed to write header: {}", e)))
    }

    /// Serializes one data row.
    pub fn serialize<T: Serialize>(&mut self, row: &T) -> Result<(), PipelineError> {
        self.writer
            .serialize(row)
            .map_err(|e| PipelineError::Io(format!("Failed to write row: {}", e)))?;
        self.rows += 1;
        Ok(())
    }

    /// Number of data rows written so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Returns the destination this writer will persist to.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Io` if flushing or persisting fails. On error,
    /// the temporary file is cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, PipelineError> {
        let buf_writer = self.writer.into_inner().map_err(|e| {
            PipelineError::Io(format!("Failed to flush CSV writer: {}", e.error()))
        })?;

        let named_temp = buf_writer
            .into_inner()
            .map_err(|e| PipelineError::Io(format!("Failed to flush buffer: {}", e.error())))?;

        named_temp.persist(&self.final_path).map_err(|e| {
            PipelineError::Io(format!(
                "Failed to persist file to {}: {}",
                self.final_path.display(),
                e.error
            ))
        })?;

        Ok(self.final_path)
    }
}
