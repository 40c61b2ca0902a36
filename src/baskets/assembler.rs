//! Groups one chunk's raw rows into baskets.

use std::collections::HashMap;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};

use crate::error::PipelineError;

/// A basket with its distinct products in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Basket {
    pub id: String,
    pub products: Vec<String>,
}

/// The baskets of one chunk, in the order they first appear.
#[derive(Debug, Default)]
pub struct ChunkBaskets {
    baskets: Vec<Basket>,
    positions: HashMap<String, usize>,
}

impl ChunkBaskets {
    pub fn baskets(&self) -> &[Basket] {
        &self.baskets
    }

    pub fn get(&self, basket_id: &str) -> Option<&Basket> {
        self.positions.get(basket_id).map(|&i| &self.baskets[i])
    }

    pub fn len(&self) -> usize {
        self.baskets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baskets.is_empty()
    }

    /// Appends a product to a basket's working list, creating the basket on
    /// first sight.
    fn push(&mut self, basket_id: &str, product_id: &str) {
        let idx = match self.positions.get(basket_id) {
            Some(&idx) => idx,
            None => {
                self.baskets.push(Basket {
                    id: basket_id.to_string(),
                    products: Vec::new(),
                });
                self.positions
                    .insert(basket_id.to_string(), self.baskets.len() - 1);
                self.baskets.len() - 1
            }
        };
        self.baskets[idx].products.push(product_id.to_string());
    }

    fn dedup_products(&mut self) {
        for basket in &mut self.baskets {
            basket.products.sort_unstable();
            basket.products.dedup();
        }
    }
}

/// Reads a chunk file and returns its baskets with deduplicated, sorted
/// product lists.
///
/// # Errors
///
/// Returns `PipelineError::MalformedRow` for a row without exactly two
/// fields, `PipelineError::CsvInvalid` for undecodable rows, and
/// `PipelineError::Io` when the file cannot be opened.
pub fn assemble_baskets(path: &Path) -> Result<ChunkBaskets, PipelineError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let mut baskets = ChunkBaskets::default();
    let mut record = StringRecord::new();
    let mut line: u64 = 0;

    while reader
        .read_record(&mut record)
        .map_err(|e| PipelineError::CsvInvalid(format!("{}: {}", path.display(), e)))?
    {
        line += 1;
        if record.len() != 2 {
            return Err(PipelineError::MalformedRow {
                path: path.to_path_buf(),
                line: record.position().map(|p| p.line()).unwrap_or(line),
                found: record.len(),
            });
        }
        baskets.push(&record[0], &record[1]);
    }

    baskets.dedup_products();
    Ok(baskets)
}
