//! Synthetic basket data for exercising the pipeline.
//!
//! Writes a gzip CSV of `basket_id,product_id` rows. Each basket gets a
//! random UUID and 1 to 5 distinct products, and its rows are contiguous.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::{Terminator, WriterBuilder};
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::info;
use uuid::Builder;

use crate::error::PipelineError;

/// Largest accepted `--scale`.
pub const MAX_SCALE: u32 = 10;

const MAX_PRODUCTS_PER_BASKET: usize = 5;

/// Size of a generated dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetShape {
    pub baskets: u64,
    pub products: u64,
}

impl DatasetShape {
    /// `scale * 2^16` baskets drawn from `scale * 2^8` products.
    pub fn for_scale(scale: u32) -> Result<Self, PipelineError> {
        if !(1..=MAX_SCALE).contains(&scale) {
            return Err(PipelineError::InvalidConfig(format!(
                "scale must be between 1 and {}, got {}",
                MAX_SCALE, scale
            )));
        }
        Ok(Self {
            baskets: u64::from(scale) << 16,
            products: u64::from(scale) << 8,
        })
    }
}

/// What was written by [`generate_dataset`].
#[derive(Debug, Clone, Serialize)]
pub struct GenerateSummary {
    pub path: PathBuf,
    pub shape: DatasetShape,
    pub rows: u64,
}

/// Default output name for a scale, e.g. `data_2.csv.gz`.
pub fn default_output(scale: u32) -> PathBuf {
    PathBuf::from(format!("data_{}.csv.gz", scale))
}

/// Generates a dataset at `output`. The same `seed` always yields the same
/// file; without one the generator is seeded from OS entropy.
pub async fn generate_dataset(
    output: &Path,
    shape: DatasetShape,
    seed: Option<u64>,
) -> Result<GenerateSummary, PipelineError> {
    let output = output.to_owned();

    tokio::task::spawn_blocking(move || generate_dataset_blocking(&output, shape, seed))
        .await
        .map_err(|e| PipelineError::Internal(format!("Generator task join error: {}", e)))?
}

/// Blocking implementation of [`generate_dataset`].
pub fn generate_dataset_blocking(
    output: &Path,
    shape: DatasetShape,
    seed: Option<u64>,
) -> Result<GenerateSummary, PipelineError> {
    let parent_dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|e| PipelineError::Io(format!("Failed to create temporary file: {}", e)))?;

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let encoder = GzEncoder::new(BufWriter::new(temp_file), Compression::default());
    let (encoder, rows) = write_baskets(encoder, &mut rng, shape)?;

    let buf_writer = encoder
        .finish()
        .map_err(|e| PipelineError::Io(format!("Failed to finish gzip stream: {}", e)))?;
    let temp_file = buf_writer
        .into_inner()
        .map_err(|e| PipelineError::Io(format!("Failed to flush buffer: {}", e.error())))?;
    temp_file.persist(output).map_err(|e| {
        PipelineError::Io(format!("Failed to persist {}: {}", output.display(), e.error))
    })?;

    info!(
        path = %output.display(),
        baskets = shape.baskets,
        products = shape.products,
        rows,
        "Generated dataset"
    );

    Ok(GenerateSummary {
        path: output.to_path_buf(),
        shape,
        rows,
    })
}

/// Writes `shape.baskets` random baskets as CSV rows into `out`.
/// Returns the writer and the number of rows written.
pub fn write_baskets<W: Write, R: Rng>(
    out: W,
    rng: &mut R,
    shape: DatasetShape,
) -> Result<(W, u64), PipelineError> {
    if shape.products == 0 {
        return Err(PipelineError::InvalidConfig(
            "dataset needs at least one product".to_string(),
        ));
    }

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(out);

    let products = shape.products as usize;
    let mut rows = 0u64;

    for _ in 0..shape.baskets {
        let basket = Builder::from_random_bytes(rng.gen()).into_uuid().to_string();
        let size = rng
            .gen_range(1..=MAX_PRODUCTS_PER_BASKET)
            .min(products);

        for product in sample(rng, products, size).iter() {
            writer
                .write_record([basket.as_str(), product.to_string().as_str()])
                .map_err(|e| PipelineError::Io(format!("Failed to write row: {}", e)))?;
            rows += 1;
        }
    }

    let out = writer
        .into_inner()
        .map_err(|e| PipelineError::Io(format!("Failed to flush rows: {}", e.error())))?;
    Ok((out, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::collections::{HashMap, HashSet};
    use std::fs::File;
    use std::io::Read;
    use tempfile::TempDir;

    fn small_shape() -> DatasetShape {
        DatasetShape {
            baskets: 200,
            products: 30,
        }
    }

    fn rows_of(content: &str) -> Vec<(String, String)> {
        content
            .lines()
            .map(|l| {
                let (b, p) = l.split_once(',').expect("two fields");
                (b.to_string(), p.to_string())
            })
            .collect()
    }

    #[test]
    fn test_shape_for_scale() {
        let shape = DatasetShape::for_scale(2).unwrap();
        assert_eq!(shape.baskets, 131_072);
        assert_eq!(shape.products, 512);
        assert!(DatasetShape::for_scale(0).is_err());
        assert!(DatasetShape::for_scale(11).is_err());
    }

    #[test]
    fn test_default_output() {
        assert_eq!(default_output(3), PathBuf::from("data_3.csv.gz"));
    }

    #[test]
    fn test_baskets_are_contiguous_and_small() {
        let mut rng = StdRng::seed_from_u64(1);
        let (buf, rows) = write_baskets(Vec::new(), &mut rng, small_shape()).unwrap();
        let content = String::from_utf8(buf).unwrap();
        let rows_vec = rows_of(&content);
        assert_eq!(rows_vec.len() as u64, rows);

        let mut sizes: HashMap<String, usize> = HashMap::new();
        let mut finished: HashSet<String> = HashSet::new();
        let mut last: Option<String> = None;
        for (basket, product) in &rows_vec {
            if last.as_ref() != Some(basket) {
                if let Some(prev) = last.take() {
                    finished.insert(prev);
                }
                assert!(!finished.contains(basket), "basket {} is not contiguous", basket);
                last = Some(basket.clone());
            }
            *sizes.entry(basket.clone()).or_insert(0) += 1;
            let product: u64 = product.parse().expect("numeric product");
            assert!(product < 30);
        }

        assert_eq!(sizes.len(), 200);
        assert!(sizes.values().all(|&n| (1..=5).contains(&n)));
    }

    #[test]
    fn test_products_within_basket_are_distinct() {
        let mut rng = StdRng::seed_from_u64(2);
        let shape = DatasetShape {
            baskets: 100,
            products: 6,
        };
        let (buf, _) = write_baskets(Vec::new(), &mut rng, shape).unwrap();
        let content = String::from_utf8(buf).unwrap();

        let mut per_basket: HashMap<String, Vec<String>> = HashMap::new();
        for (b, p) in rows_of(&content) {
            per_basket.entry(b).or_default().push(p);
        }
        for products in per_basket.values() {
            let distinct: HashSet<&String> = products.iter().collect();
            assert_eq!(distinct.len(), products.len());
        }
    }

    #[test]
    fn test_zero_products_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        let shape = DatasetShape {
            baskets: 1,
            products: 0,
        };
        assert!(write_baskets(Vec::new(), &mut rng, shape).is_err());
    }

    #[tokio::test]
    async fn test_seeded_generation_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a.csv.gz");
        let second = dir.path().join("b.csv.gz");

        let summary = generate_dataset(&first, small_shape(), Some(42))
            .await
            .expect("generate failed");
        generate_dataset(&second, small_shape(), Some(42))
            .await
            .expect("generate failed");

        let decode = |path: &Path| {
            let mut s = String::new();
            GzDecoder::new(File::open(path).unwrap())
                .read_to_string(&mut s)
                .unwrap();
            s
        };
        let content = decode(&first);
        assert_eq!(content, decode(&second));
        assert_eq!(content.lines().count() as u64, summary.rows);
    }
}
