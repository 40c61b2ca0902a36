//! Streaming stages that work file-by-file with bounded memory.
//!
//! This module provides basket-preserving chunking of the raw input, the
//! cross-chunk merge of pair-count files into the final report, and atomic
//! CSV writing with automatic cleanup on failure.

mod atomic_writer;
mod basket_chunker;
mod pair_merger;

pub use atomic_writer::AtomicCsvWriter;
pub use basket_chunker::{
    parse_chunk_index, remove_intermediates, split_input, split_input_blocking, ChunkFile,
    ChunkResult, CHUNK_PREFIX, PAIR_COUNT_SUFFIX, TEMP_SUFFIX,
};
pub use pair_merger::{consume_matches, merge_pair_counts, merge_pair_counts_blocking, MergeStats};
