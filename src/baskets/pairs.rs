//! Canonical product pairs and pair-count files.
//!
//! A pair-count file is a headerless CSV of `product_1,product_2,num_baskets`
//! rows with `product_1 < product_2` and no repeated pair. The same row shape,
//! with a header, is used for the final report.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::streaming::AtomicCsvWriter;

/// Header row of the final report.
pub const REPORT_HEADER: [&str; 3] = ["Product_1", "Product_2", "num_baskets"];

/// Per-scope pair counts, ordered by pair so files are written deterministically.
pub type PairCounts = BTreeMap<ProductPair, u64>;

/// An unordered pair of distinct products, stored with the smaller id first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductPair {
    first: String,
    second: String,
}

impl ProductPair {
    /// Builds the canonical pair for two products. Returns `None` when both
    /// ids are equal, since a product never pairs with itself.
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Option<Self> {
        let (a, b) = (a.into(), b.into());
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { first: a, second: b }),
            std::cmp::Ordering::Greater => Some(Self { first: b, second: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn first(&self) -> &str {
        &self.first
    }

    pub fn second(&self) -> &str {
        &self.second
    }
}

/// One row of a pair-count file or of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCountRecord {
    #[serde(rename = "Product_1")]
    pub product_1: String,
    #[serde(rename = "Product_2")]
    pub product_2: String,
    pub num_baskets: u64,
}

impl PairCountRecord {
    pub fn new(pair: &ProductPair, num_baskets: u64) -> Self {
        Self {
            product_1: pair.first.clone(),
            product_2: pair.second.clone(),
            num_baskets,
        }
    }
}

/// Returns true when a pair-count file has been depleted to zero bytes.
pub fn is_exhausted(path: &Path) -> Result<bool, PipelineError> {
    let metadata = fs::metadata(path).map_err(|e| {
        PipelineError::Io(format!("Failed to stat {}: {}", path.display(), e))
    })?;
    Ok(metadata.len() == 0)
}

/// Loads a pair-count file into memory.
///
/// Rejects rows that are not in canonical order and pairs that appear twice,
/// since either would break exactly-once accounting during the merge.
pub fn read_pair_counts(path: &Path) -> Result<PairCounts, PipelineError> {
    let mut counts = PairCounts::new();
    if is_exhausted(path)? {
        return Ok(counts);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_path(path)
        .map_err(|e| PipelineError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    for (idx, result) in reader.deserialize::<PairCountRecord>().enumerate() {
        let record = result.map_err(|e| {
            PipelineError::CsvInvalid(format!("{} row {}: {}", path.display(), idx + 1, e))
        })?;

        let pair = match ProductPair::new(record.product_1.as_str(), record.product_2.as_str()) {
            Some(pair) if pair.first == record.product_1 => pair,
            _ => {
                return Err(PipelineError::CsvInvalid(format!(
                    "{} row {}: pair ({}, {}) is not in canonical order",
                    path.display(),
                    idx + 1,
                    record.product_1,
                    record.product_2
                )))
            }
        };

        if counts.insert(pair, record.num_baskets).is_some() {
            return Err(PipelineError::CsvInvalid(format!(
                "{} row {}: duplicate pair ({}, {})",
                path.display(),
                idx + 1,
                record.product_1,
                record.product_2
            )));
        }
    }

    Ok(counts)
}

/// Atomically replaces `path` with the given counts. An empty map produces a
/// zero-byte file. Returns the number of rows written.
pub fn write_pair_counts(path: &Path, counts: &PairCounts) -> Result<u64, PipelineError> {
    let mut writer = AtomicCsvWriter::new(path)?;
    for (pair, count) in counts {
        writer.serialize(&PairCountRecord::new(pair, *count))?;
    }
    let rows = writer.rows();
    writer.finish()?;
    Ok(rows)
}

/// Sum of all counts, i.e. the number of (pair, basket) occurrences.
pub fn total_occurrences(counts: &PairCounts) -> u64 {
    counts.values().sum()
}
