//! Bounded-memory market-basket pair counting.
//!
//! Counts, for every unordered pair of distinct products, the number of
//! baskets containing both. The input is split into basket-preserving chunk
//! files, each chunk is reduced to pair counts, and the per-chunk counts are
//! merged into a single report without holding the whole dataset in memory.

pub mod baskets;
pub mod error;
pub mod generate;
pub mod pipeline;
pub mod streaming;

pub use error::{ErrorPresentation, PipelineError};
pub use pipeline::{run_pipeline, PipelineConfig, RunSummary};
