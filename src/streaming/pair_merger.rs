//! Cross-chunk merging of pair-count files into the final report.
//!
//! Files are consumed in chunk order. The first non-empty file becomes the
//! primary and is compared against every later non-empty file (secondary):
//!
//! - pairs present in both are summed into the primary,
//! - those pairs are removed from the secondary, which is persisted back,
//! - once all secondaries are visited, the primary is appended to the report.
//!
//! The next file then becomes the primary. Everything it still holds is
//! absent from the report, because every pair it shared with an earlier
//! primary was stripped during that primary's pass. Memory holds one primary
//! and one secondary at a time; a zero-byte file is exhausted and skipped.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::baskets::{
    is_exhausted, read_pair_counts, write_pair_counts, PairCountRecord, PairCounts,
    ProductPair, REPORT_HEADER,
};
use crate::error::PipelineError;
use crate::streaming::AtomicCsvWriter;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Counters describing one merge run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// Files that served as primary.
    pub primaries: u64,
    /// Files skipped as primary because they were already exhausted.
    pub skipped_empty: u64,
    /// Primary/secondary comparisons performed.
    pub comparisons: u64,
    /// Pairs moved from a secondary into a primary.
    pub matched_pairs: u64,
    /// Secondaries depleted to zero bytes during the merge.
    pub secondaries_exhausted: u64,
    /// Data rows written to the report.
    pub report_rows: u64,
    /// Sum of `num_baskets` over the report.
    pub total_occurrences: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Merges pair-count files into the report at `report_path`.
///
/// `files` must already be in ascending chunk order. The files are rewritten
/// as their pairs are consumed. The report is written atomically and replaces
/// any previous file at `report_path`.
pub async fn merge_pair_counts(
    files: Vec<PathBuf>,
    report_path: &Path,
) -> Result<MergeStats, PipelineError> {
    let report_path = report_path.to_owned();

    tokio::task::spawn_blocking(move || merge_pair_counts_blocking(&files, &report_path))
        .await
        .map_err(|e| PipelineError::Internal(format!("Merge task panicked: {}", e)))?
}

/// Blocking implementation of [`merge_pair_counts`].
pub fn merge_pair_counts_blocking(
    files: &[PathBuf],
    report_path: &Path,
) -> Result<MergeStats, PipelineError> {
    info!(
        files = files.len(),
        report = %report_path.display(),
        "Consolidating pair counts"
    );

    let mut stats = MergeStats::default();
    let mut report = ReportWriter::create(report_path)?;

    for (i, primary_path) in files.iter().enumerate() {
        if is_exhausted(primary_path)? {
            debug!(file = %primary_path.display(), "Primary already exhausted, skipping");
            stats.skipped_empty += 1;
            continue;
        }

        let mut primary = read_pair_counts(primary_path)?;

        for secondary_path in &files[i + 1..] {
            if is_exhausted(secondary_path)? {
                continue;
            }

            let mut secondary = read_pair_counts(secondary_path)?;
            stats.comparisons += 1;

            let matched = consume_matches(&mut primary, &mut secondary)?;
            if matched == 0 {
                continue;
            }

            write_pair_counts(secondary_path, &secondary)?;
            stats.matched_pairs += matched;
            if secondary.is_empty() {
                stats.secondaries_exhausted += 1;
            }

            debug!(
                primary = %primary_path.display(),
                secondary = %secondary_path.display(),
                matched,
                remaining = secondary.len(),
                "Consumed matching pairs"
            );
        }

        report.append(&primary)?;
        stats.primaries += 1;
    }

    stats.report_rows = report.rows();
    stats.total_occurrences = report.total_occurrences();
    report.finish()?;

    info!(
        primaries = stats.primaries,
        comparisons = stats.comparisons,
        matched_pairs = stats.matched_pairs,
        report_rows = stats.report_rows,
        "Report written"
    );

    Ok(stats)
}

/// Moves every pair the secondary shares with the primary into the primary.
///
/// A matched pair's primary count becomes the sum of both counts and the pair
/// is removed from the secondary; unmatched primary pairs keep their value.
/// Returns the number of matched pairs.
pub fn consume_matches(
    primary: &mut PairCounts,
    secondary: &mut PairCounts,
) -> Result<u64, PipelineError> {
    let matched: Vec<ProductPair> = if primary.len() <= secondary.len() {
        primary
            .keys()
            .filter(|pair| secondary.contains_key(*pair))
            .cloned()
            .collect()
    } else {
        secondary
            .keys()
            .filter(|pair| primary.contains_key(*pair))
            .cloned()
            .collect()
    };

    for pair in &matched {
        let extra = secondary.remove(pair).unwrap_or(0);
        if let Some(count) = primary.get_mut(pair) {
            *count = count.checked_add(extra).ok_or_else(|| {
                PipelineError::MergeError(format!(
                    "count overflow for pair ({}, {})",
                    pair.first(),
                    pair.second()
                ))
            })?;
        }
    }

    Ok(matched.len() as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Report Writer
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only report with a single header row.
struct ReportWriter {
    writer: AtomicCsvWriter,
    total_occurrences: u64,
}

impl ReportWriter {
    fn create(path: &Path) -> Result<Self, PipelineError> {
        let mut writer = AtomicCsvWriter::new(path)?;
        writer.write_header(&REPORT_HEADER)?;
        Ok(Self {
            writer,
            total_occurrences: 0,
        })
    }

    fn append(&mut self, counts: &PairCounts) -> Result<(), PipelineError> {
        for (pair, count) in counts {
            self.writer.serialize(&PairCountRecord::new(pair, *count))?;
            self.total_occurrences += count;
        }
        Ok(())
    }

    fn rows(&self) -> u64 {
        self.writer.rows()
    }

    fn total_occurrences(&self) -> u64 {
        self.total_occurrences
    }

    fn finish(self) -> Result<PathBuf, PipelineError> {
        let path = self.writer.final_path().to_path_buf();
        self.writer.finish().map_err(|e| {
            PipelineError::MergeError(format!("Failed to write report {}: {}", path.display(), e))
        })
    }
}
