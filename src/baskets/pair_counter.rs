//! Expands baskets into canonical product pairs and tallies them per chunk.

use std::path::PathBuf;

use tracing::debug;

use super::assembler::{assemble_baskets, ChunkBaskets};
use super::pairs::{total_occurrences, write_pair_counts, PairCounts, ProductPair};
use crate::error::PipelineError;
use crate::streaming::ChunkFile;

/// Outcome of counting one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPairCounts {
    pub chunk_index: u32,
    /// Pair-count file written for the chunk.
    pub path: PathBuf,
    pub baskets: u64,
    pub distinct_pairs: u64,
    /// Sum of all pair counts in the chunk.
    pub occurrences: u64,
}

/// All 2-combinations of a basket's products.
///
/// `products` must be sorted and deduplicated, as produced by the assembler.
pub fn basket_pairs(products: &[String]) -> impl Iterator<Item = ProductPair> + '_ {
    products.iter().enumerate().flat_map(move |(i, first)| {
        products[i + 1..]
            .iter()
            .filter_map(move |second| ProductPair::new(first.as_str(), second.as_str()))
    })
}

/// Number of baskets in the chunk containing each pair.
pub fn count_pairs(baskets: &ChunkBaskets) -> PairCounts {
    let mut counts = PairCounts::new();
    for basket in baskets.baskets() {
        for pair in basket_pairs(&basket.products) {
            *counts.entry(pair).or_insert(0) += 1;
        }
    }
    counts
}

/// Assembles a chunk, counts its pairs and writes its pair-count file.
pub fn count_chunk(chunk: &ChunkFile) -> Result<ChunkPairCounts, PipelineError> {
    let baskets = assemble_baskets(&chunk.path)?;
    let counts = count_pairs(&baskets);
    let path = chunk.pair_count_path();
    let distinct_pairs = write_pair_counts(&path, &counts)?;
    let occurrences = total_occurrences(&counts);

    debug!(
        chunk_index = chunk.index,
        baskets = baskets.len(),
        distinct_pairs,
        occurrences,
        "Counted chunk pairs"
    );

    Ok(ChunkPairCounts {
        chunk_index: chunk.index,
        path,
        baskets: baskets.len() as u64,
        distinct_pairs,
        occurrences,
    })
}
