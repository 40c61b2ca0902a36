//! End-to-end pipeline: chunk, count, merge.
//!
//! Stages run strictly in order. Chunking must finish before any chunk is
//! counted, and every chunk must be counted before the merge starts. Counting
//! runs on a bounded worker pool; the merge is single-threaded because it
//! rewrites secondary files in place.

mod config;
mod pool;

pub use config::{default_workers, PipelineConfig, DEFAULT_LINE_LIMIT};
pub use pool::ChunkWorkerPool;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::baskets::{count_chunk, ChunkPairCounts};
use crate::error::PipelineError;
use crate::streaming::{merge_pair_counts, split_input, ChunkFile, MergeStats};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Wall-clock time spent in each stage, in seconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub chunking_secs: f64,
    pub counting_secs: f64,
    pub merging_secs: f64,
    pub total_secs: f64,
}

/// Outcome of a successful pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub input: PathBuf,
    pub report_path: PathBuf,
    pub line_limit: u64,
    pub chunks: usize,
    pub total_rows: u64,
    pub total_baskets: u64,
    /// Distinct pairs in the report.
    pub distinct_pairs: u64,
    /// Sum of `num_baskets` over the report.
    pub pair_occurrences: u64,
    pub merge: MergeStats,
    pub timings: StageTimings,
}

impl RunSummary {
    /// Writes the summary as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Internal(format!("Failed to encode summary: {}", e)))?;
        std::fs::write(path, json).map_err(|e| {
            PipelineError::Io(format!("Failed to write summary {}: {}", path.display(), e))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the full pipeline and writes the report to `config.report_path`.
///
/// Intermediate files are removed afterwards, whether or not counting or
/// merging succeeded, unless `keep_intermediates` is set.
///
/// # Errors
///
/// A chunking failure returns before any chunk is counted. Counting and merge
/// failures abort the run; no report is left behind in either case.
pub async fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    config.validate()?;
    let started = Instant::now();

    info!(
        input = %config.input.display(),
        line_limit = config.line_limit,
        workers = config.workers,
        "Splitting input into chunks"
    );
    let chunked = split_input(&config.input, &config.work_dir, config.line_limit).await?;
    let chunking_secs = started.elapsed().as_secs_f64();

    let outcome = count_and_merge(config, &chunked.chunks).await;

    if !config.keep_intermediates {
        cleanup_intermediates(&chunked.chunks).await;
    }

    let (counted, merge, counting_secs, merging_secs) = outcome?;

    let chunk_occurrences: u64 = counted.iter().map(|c| c.occurrences).sum();
    verify_conservation(chunk_occurrences, &merge, &config.report_path).await?;

    let summary = RunSummary {
        input: config.input.clone(),
        report_path: config.report_path.clone(),
        line_limit: config.line_limit,
        chunks: chunked.chunks.len(),
        total_rows: chunked.total_rows,
        total_baskets: chunked.total_baskets,
        distinct_pairs: merge.report_rows,
        pair_occurrences: merge.total_occurrences,
        merge,
        timings: StageTimings {
            chunking_secs,
            counting_secs,
            merging_secs,
            total_secs: started.elapsed().as_secs_f64(),
        },
    };

    info!(
        chunks = summary.chunks,
        distinct_pairs = summary.distinct_pairs,
        pair_occurrences = summary.pair_occurrences,
        total_secs = summary.timings.total_secs,
        "Pipeline complete"
    );

    Ok(summary)
}

/// Assembles and counts every chunk on the worker pool.
///
/// Results are returned in ascending chunk order. After the first failure,
/// chunks still waiting for a slot are skipped. Every task has finished by the
/// time this returns, so no pair-count file is written afterwards.
pub async fn count_chunks(
    chunks: &[ChunkFile],
    pool: &ChunkWorkerPool,
) -> Result<Vec<ChunkPairCounts>, PipelineError> {
    let mut handles = Vec::with_capacity(chunks.len());
    let failed = Arc::new(AtomicBool::new(false));

    for chunk in chunks.iter().cloned() {
        let pool = pool.clone();
        let failed = failed.clone();
        handles.push(tokio::spawn(async move {
            let _permit = pool.acquire().await;
            if failed.load(Ordering::Acquire) {
                return Ok(None);
            }
            let outcome = tokio::task::spawn_blocking(move || count_chunk(&chunk))
                .await
                .map_err(|e| PipelineError::Internal(format!("Chunk task join error: {}", e)))?;
            if outcome.is_err() {
                failed.store(true, Ordering::Release);
            }
            outcome.map(Some)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut failure: Option<PipelineError> = None;

    // Drain every handle; aborting one would not stop its blocking counter.
    for handle in handles {
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(PipelineError::Internal(format!(
                "Chunk task join error: {}",
                e
            ))),
        };
        match outcome {
            Ok(Some(counted)) => results.push(counted),
            Ok(None) => {}
            Err(e) => {
                if failure.is_none() {
                    failure = Some(e);
                }
            }
        }
    }

    if let Some(e) = failure {
        return Err(e);
    }

    results.sort_by_key(|c| c.chunk_index);
    Ok(results)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn count_and_merge(
    config: &PipelineConfig,
    chunks: &[ChunkFile],
) -> Result<(Vec<ChunkPairCounts>, MergeStats, f64, f64), PipelineError> {
    let counting_started = Instant::now();
    let pool = ChunkWorkerPool::new(config.workers);
    let counted = count_chunks(chunks, &pool).await?;
    let counting_secs = counting_started.elapsed().as_secs_f64();

    let merging_started = Instant::now();
    let files: Vec<PathBuf> = counted.iter().map(|c| c.path.clone()).collect();
    let merge = merge_pair_counts(files, &config.report_path).await?;
    let merging_secs = merging_started.elapsed().as_secs_f64();

    Ok((counted, merge, counting_secs, merging_secs))
}

/// Fails when the report total differs from the per-chunk totals. The
/// report is removed in that case so no inconsistent output is left behind.
async fn verify_conservation(
    chunk_occurrences: u64,
    merge: &MergeStats,
    report_path: &Path,
) -> Result<(), PipelineError> {
    if chunk_occurrences == merge.total_occurrences {
        return Ok(());
    }

    if let Err(e) = tokio::fs::remove_file(report_path).await {
        warn!(report = %report_path.display(), error = %e, "Failed to remove inconsistent report");
    }
    Err(PipelineError::MergeError(format!(
        "report holds {} pair occurrences but chunks produced {}",
        merge.total_occurrences, chunk_occurrences
    )))
}

/// Best-effort removal of chunk and pair-count files.
async fn cleanup_intermediates(chunks: &[ChunkFile]) {
    for chunk in chunks {
        let _ = tokio::fs::remove_file(&chunk.path).await;
        let _ = tokio::fs::remove_file(chunk.pair_count_path()).await;
    }
    debug!(chunks = chunks.len(), "Removed intermediate files");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baskets::{basket_pairs, PairCountRecord, ProductPair};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::{BTreeMap, BTreeSet, HashSet};
    use std::fs::{self, File};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_gzip(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("data.csv.gz");
        let file = File::create(&path).expect("Failed to create input");
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(content.as_bytes()).expect("Failed to write input");
        encoder.finish().expect("Failed to finish gzip");
        path
    }

    fn read_report(path: &Path) -> BTreeMap<(String, String), u64> {
        let mut reader = csv::Reader::from_path(path).expect("Failed to open report");
        let mut rows = BTreeMap::new();
        for result in reader.deserialize::<PairCountRecord>() {
            let row = result.expect("Failed to read report row");
            let previous = rows.insert((row.product_1, row.product_2), row.num_baskets);
            assert!(previous.is_none(), "duplicate pair in report");
        }
        rows
    }

    /// Pair counts computed over the whole input at once, without chunking.
    fn direct_counts(content: &str) -> BTreeMap<(String, String), u64> {
        let mut baskets: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for line in content.lines() {
            let (basket, product) = line.split_once(',').expect("two fields");
            baskets.entry(basket).or_default().insert(product.to_string());
        }

        let mut counts = BTreeMap::new();
        for products in baskets.values() {
            let products: Vec<String> = products.iter().cloned().collect();
            for pair in basket_pairs(&products) {
                *counts
                    .entry((pair.first().to_string(), pair.second().to_string()))
                    .or_insert(0) += 1;
            }
        }
        counts
    }

    fn random_input(seed: u64, baskets: usize, products: u32) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut content = String::new();
        for basket in 0..baskets {
            let size = rng.gen_range(1..=5);
            for _ in 0..size {
                let product = rng.gen_range(0..products);
                content.push_str(&format!("b{},{}\n", basket, product));
            }
        }
        content
    }

    fn config_for(dir: &TempDir, input: PathBuf, line_limit: u64) -> PipelineConfig {
        PipelineConfig::new(input, dir.path().join("report.csv"))
            .work_dir(dir.path().join("work"))
            .line_limit(line_limit)
            .workers(2)
    }

    #[tokio::test]
    async fn test_small_end_to_end() {
        let dir = TempDir::new().unwrap();
        let input = write_gzip(dir.path(), "1,A\n1,B\n2,A\n2,B\n3,A\n3,C\n");
        let config = config_for(&dir, input, 1);

        let summary = run_pipeline(&config).await.expect("pipeline failed");

        let report = read_report(&config.report_path);
        let expected: BTreeMap<(String, String), u64> = [
            (("A".to_string(), "B".to_string()), 2),
            (("A".to_string(), "C".to_string()), 1),
        ]
        .into_iter()
        .collect();
        assert_eq!(report, expected);
        assert_eq!(summary.chunks, 3);
        assert_eq!(summary.total_baskets, 3);
        assert_eq!(summary.pair_occurrences, 3);
    }

    #[tokio::test]
    async fn test_count_conservation_against_direct_computation() {
        let content = random_input(7, 400, 25);
        let expected = direct_counts(&content);

        for line_limit in [1, 7, 50, 10_000] {
            let dir = TempDir::new().unwrap();
            let input = write_gzip(dir.path(), &content);
            let config = config_for(&dir, input, line_limit);

            let summary = run_pipeline(&config).await.expect("pipeline failed");
            let report = read_report(&config.report_path);

            assert_eq!(report, expected, "line_limit {}", line_limit);
            assert_eq!(
                summary.pair_occurrences,
                expected.values().sum::<u64>(),
                "line_limit {}",
                line_limit
            );
        }
    }

    #[tokio::test]
    async fn test_rerun_produces_identical_report() {
        let dir = TempDir::new().unwrap();
        let content = random_input(11, 150, 12);
        let input = write_gzip(dir.path(), &content);
        let config = config_for(&dir, input, 20);

        run_pipeline(&config).await.expect("first run failed");
        let first = fs::read_to_string(&config.report_path).unwrap();
        run_pipeline(&config).await.expect("second run failed");
        let second = fs::read_to_string(&config.report_path).unwrap();

        let first_rows: HashSet<&str> = first.lines().collect();
        let second_rows: HashSet<&str> = second.lines().collect();
        assert_eq!(first_rows, second_rows);
        assert_eq!(first.lines().count(), second.lines().count());
    }

    #[tokio::test]
    async fn test_single_product_baskets_yield_header_only() {
        let dir = TempDir::new().unwrap();
        let input = write_gzip(dir.path(), "1,A\n2,B\n3,A\n");
        let config = config_for(&dir, input, 1);

        let summary = run_pipeline(&config).await.expect("pipeline failed");

        assert_eq!(summary.distinct_pairs, 0);
        assert_eq!(
            fs::read_to_string(&config.report_path).unwrap(),
            "Product_1,Product_2,num_baskets\n"
        );
    }

    #[tokio::test]
    async fn test_intermediates_are_removed() {
        let dir = TempDir::new().unwrap();
        let input = write_gzip(dir.path(), "1,A\n1,B\n2,A\n2,C\n");
        let config = config_for(&dir, input, 1);

        run_pipeline(&config).await.expect("pipeline failed");

        let leftovers: Vec<_> = fs::read_dir(&config.work_dir).unwrap().collect();
        assert!(leftovers.is_empty(), "work dir should be empty: {:?}", leftovers);
    }

    #[tokio::test]
    async fn test_keep_intermediates() {
        let dir = TempDir::new().unwrap();
        let input = write_gzip(dir.path(), "1,A\n1,B\n2,A\n2,C\n");
        let config = config_for(&dir, input, 1).keep_intermediates(true);

        run_pipeline(&config).await.expect("pipeline failed");

        assert!(config.work_dir.join("subdata_001.csv").exists());
        assert!(config.work_dir.join("subdata_002_tuplecount.csv").exists());
    }

    #[tokio::test]
    async fn test_chunking_failure_stops_pipeline() {
        let dir = TempDir::new().unwrap();
        let input = write_gzip(dir.path(), "1,A\n1,B,C\n");
        let config = config_for(&dir, input, 1);

        let result = run_pipeline(&config).await;

        assert!(matches!(result, Err(PipelineError::MalformedRow { .. })));
        assert!(!config.report_path.exists());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_io() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir, dir.path().join("missing.csv.gz"), 0);

        let result = run_pipeline(&config).await;

        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        assert!(!config.work_dir.exists());
    }

    #[tokio::test]
    async fn test_count_chunks_returns_chunk_order() {
        let dir = TempDir::new().unwrap();
        let mut chunks = Vec::new();
        for index in 1..=6u32 {
            let path = dir.path().join(ChunkFile::file_name(index));
            fs::write(&path, format!("{0},A\n{0},B\n", index)).unwrap();
            chunks.push(ChunkFile {
                index,
                path,
                rows: 2,
                baskets: 1,
            });
        }

        let counted = count_chunks(&chunks, &ChunkWorkerPool::new(3))
            .await
            .expect("count_chunks failed");

        let order: Vec<u32> = counted.iter().map(|c| c.chunk_index).collect();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
        assert!(counted.iter().all(|c| c.occurrences == 1));
    }

    #[tokio::test]
    async fn test_summary_json() {
        let dir = TempDir::new().unwrap();
        let input = write_gzip(dir.path(), "1,A\n1,B\n");
        let config = config_for(&dir, input, 10);

        let summary = run_pipeline(&config).await.expect("pipeline failed");
        let json_path = dir.path().join("summary.json");
        summary.write_json(&json_path).expect("write_json failed");

        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed["distinct_pairs"], 1);
        assert_eq!(parsed["merge"]["primaries"], 1);
        assert!(parsed["timings"]["total_secs"].is_number());
    }

    #[test]
    fn test_direct_counts_helper_is_canonical() {
        let counts = direct_counts("1,b\n1,a\n");
        let pair = ProductPair::new("b", "a").unwrap();
        assert_eq!(
            counts.get(&(pair.first().to_string(), pair.second().to_string())),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_failed_counting_leaves_no_work_running() {
        let dir = TempDir::new().unwrap();
        let missing = ChunkFile {
            index: 1,
            path: dir.path().join(ChunkFile::file_name(1)),
            rows: 1,
            baskets: 1,
        };
        let large_path = dir.path().join(ChunkFile::file_name(2));
        let rows: String = (0..600).map(|p| format!("big,{}\n", p)).collect();
        fs::write(&large_path, rows).unwrap();
        let large = ChunkFile {
            index: 2,
            path: large_path,
            rows: 600,
            baskets: 1,
        };

        let result = count_chunks(&[missing, large.clone()], &ChunkWorkerPool::new(2)).await;
        assert!(matches!(result, Err(PipelineError::Io(_))));

        cleanup_intermediates(std::slice::from_ref(&large)).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert!(!large.path.exists());
        assert!(
            !large.pair_count_path().exists(),
            "pair-count file reappeared after cleanup"
        );
    }

    #[tokio::test]
    async fn test_conservation_mismatch_removes_report() {
        let dir = TempDir::new().unwrap();
        let report = dir.path().join("report.csv");
        fs::write(&report, "Product_1,Product_2,num_baskets\nA,B,5\n").unwrap();
        let merge = MergeStats {
            total_occurrences: 5,
            ..MergeStats::default()
        };

        let result = verify_conservation(4, &merge, &report).await;
        assert!(matches!(result, Err(PipelineError::MergeError(_))));
        assert!(!report.exists());

        fs::write(&report, "Product_1,Product_2,num_baskets\nA,B,5\n").unwrap();
        verify_conservation(5, &merge, &report)
            .await
            .expect("matching totals should pass");
        assert!(report.exists());
    }
}
