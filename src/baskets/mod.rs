//! Per-chunk basket processing.
//!
//! Turns a chunk file into baskets, then into canonical product-pair counts
//! persisted as the chunk's pair-count file.

mod assembler;
mod pair_counter;
mod pairs;

pub use assembler::{assemble_baskets, Basket, ChunkBaskets};
pub use pair_counter::{basket_pairs, count_chunk, count_pairs, ChunkPairCounts};
pub use pairs::{
    is_exhausted, read_pair_counts, total_occurrences, write_pair_counts, PairCountRecord,
    PairCounts, ProductPair, REPORT_HEADER,
};
