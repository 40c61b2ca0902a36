//! Basket-preserving chunking of the raw input stream.
//!
//! Splits a `basket_id,product_id` CSV (gzip or plain) into chunk files of
//! roughly `line_limit` rows each. A chunk only rolls over on a basket
//! boundary, so every basket lands entirely inside one chunk file.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

use csv::{ByteRecord, ReaderBuilder, Terminator, Writer, WriterBuilder};
use flate2::read::MultiGzDecoder;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// File name prefix shared by chunk files and pair-count files.
pub const CHUNK_PREFIX: &str = "subdata_";

/// Suffix inserted before `.csv` for pair-count files.
pub const PAIR_COUNT_SUFFIX: &str = "_tuplecount";

/// Suffix of in-progress temporary files written next to intermediates.
pub const TEMP_SUFFIX: &str = ".tmp";

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

const BUFFER_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to one chunk file produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    /// 1-based sequence number embedded in the file name.
    pub index: u32,
    /// Path to the chunk file.
    pub path: PathBuf,
    /// Number of raw rows in the chunk.
    pub rows: u64,
    /// Number of baskets in the chunk.
    pub baskets: u64,
}

impl ChunkFile {
    /// File name of the chunk with the given index, e.g. `subdata_001.csv`.
    pub fn file_name(index: u32) -> String {
        format!("{}{:03}.csv", CHUNK_PREFIX, index)
    }

    /// Path of the pair-count file derived from this chunk,
    /// e.g. `subdata_001_tuplecount.csv`.
    pub fn pair_count_path(&self) -> PathBuf {
        self.path.with_file_name(format!(
            "{}{:03}{}.csv",
            CHUNK_PREFIX, self.index, PAIR_COUNT_SUFFIX
        ))
    }
}

/// Result of splitting the input into chunks.
#[derive(Debug, Clone)]
pub struct ChunkResult {
    /// Chunk handles in ascending index order.
    pub chunks: Vec<ChunkFile>,
    /// Total rows read from the input.
    pub total_rows: u64,
    /// Total baskets read from the input.
    pub total_baskets: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Splits `source` into basket-preserving chunk files inside `work_dir`.
///
/// Stale chunk and pair-count files from a previous run are removed first.
/// A chunk is closed once it holds at least `line_limit` rows and the next
/// row starts a different basket; a basket larger than `line_limit` simply
/// produces an oversized chunk.
///
/// # Errors
///
/// Returns `PipelineError::MalformedRow` for a row that does not have exactly
/// two fields, and `PipelineError::ChunkError` for I/O failures. On error,
/// every chunk file written by this call is removed.
pub async fn split_input(
    source: &Path,
    work_dir: &Path,
    line_limit: u64,
) -> Result<ChunkResult, PipelineError> {
    tokio::fs::create_dir_all(work_dir).await.map_err(|e| {
        PipelineError::ChunkError(format!("Failed to create work directory: {}", e))
    })?;

    let source = source.to_owned();
    let work_dir = work_dir.to_owned();

    tokio::task::spawn_blocking(move || split_input_blocking(&source, &work_dir, line_limit))
        .await
        .map_err(|e| PipelineError::Internal(format!("Chunking task join error: {}", e)))?
}

/// Blocking implementation of [`split_input`].
pub fn split_input_blocking(
    source: &Path,
    work_dir: &Path,
    line_limit: u64,
) -> Result<ChunkResult, PipelineError> {
    if line_limit == 0 {
        return Err(PipelineError::InvalidConfig(
            "line_limit must be at least 1".to_string(),
        ));
    }

    let removed = remove_intermediates(work_dir)?;
    if removed > 0 {
        debug!(removed, work_dir = %work_dir.display(), "Removed stale intermediate files");
    }

    let mut created: Vec<PathBuf> = Vec::new();
    let result = split_records(source, work_dir, line_limit, &mut created);

    if result.is_err() {
        for path in &created {
            let _ = fs::remove_file(path);
        }
    }

    result
}

/// Deletes chunk files, pair-count files and unfinished temporaries in
/// `work_dir` left by earlier runs.
/// Returns the number of files removed. A missing directory removes nothing.
pub fn remove_intermediates(work_dir: &Path) -> Result<usize, PipelineError> {
    let entries = match fs::read_dir(work_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(PipelineError::Io(format!(
                "Failed to list {}: {}",
                work_dir.display(),
                e
            )))
        }
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::Io(format!("Failed to list entry: {}", e)))?;
        let name = entry.file_name();
        let is_intermediate = name
            .to_str()
            .map(|n| parse_chunk_index(n).is_some() || is_temp_file_name(n))
            .unwrap_or(false);

        if is_intermediate && entry.path().is_file() {
            fs::remove_file(entry.path()).map_err(|e| {
                PipelineError::Io(format!("Failed to remove {}: {}", entry.path().display(), e))
            })?;
            removed += 1;
        }
    }

    Ok(removed)
}

/// Extracts the sequence number from a chunk or pair-count file name.
///
/// `subdata_012.csv` and `subdata_012_tuplecount.csv` both yield `Some(12)`.
pub fn parse_chunk_index(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_prefix(CHUNK_PREFIX)?.strip_suffix(".csv")?;
    let digits = stem.strip_suffix(PAIR_COUNT_SUFFIX).unwrap_or(stem);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn is_temp_file_name(file_name: &str) -> bool {
    file_name.starts_with(CHUNK_PREFIX) && file_name.ends_with(TEMP_SUFFIX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Chunking
// ─────────────────────────────────────────────────────────────────────────────

fn split_records(
    source: &Path,
    work_dir: &Path,
    line_limit: u64,
    created: &mut Vec<PathBuf>,
) -> Result<ChunkResult, PipelineError> {
    let input = open_input(source)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut chunks: Vec<ChunkFile> = Vec::new();
    let mut current: Option<OpenChunk> = None;
    let mut total_rows: u64 = 0;
    let mut total_baskets: u64 = 0;
    let mut record = ByteRecord::new();

    loop {
        let more = reader.read_byte_record(&mut record).map_err(|e| {
            PipelineError::CsvInvalid(format!("{}: {}", source.display(), e))
        })?;
        if !more {
            break;
        }

        if record.len() != 2 {
            return Err(PipelineError::MalformedRow {
                path: source.to_path_buf(),
                line: record.position().map(|p| p.line()).unwrap_or(total_rows + 1),
                found: record.len(),
            });
        }

        let basket = &record[0];
        let need_new_chunk = match &current {
            None => true,
            Some(chunk) => chunk.rows >= line_limit && chunk.last_basket != basket,
        };

        if need_new_chunk {
            if let Some(chunk) = current.take() {
                chunks.push(chunk.finish()?);
            }

            let index = chunks.len() as u32 + 1;
            let path = work_dir.join(ChunkFile::file_name(index));
            created.push(path.clone());
            current = Some(OpenChunk::create(index, path)?);
        }

        if let Some(ref mut chunk) = current {
            if chunk.write(&record)? {
                total_baskets += 1;
            }
            total_rows += 1;
        }
    }

    if let Some(chunk) = current.take() {
        chunks.push(chunk.finish()?);
    }

    if chunks.is_empty() {
        warn!(source = %source.display(), "Input contained no records");
    }

    info!(
        total_rows,
        total_baskets,
        chunk_count = chunks.len(),
        line_limit,
        "Chunking complete"
    );

    Ok(ChunkResult {
        chunks,
        total_rows,
        total_baskets,
    })
}

/// Opens the input, transparently decompressing gzip.
fn open_input(source: &Path) -> Result<Box<dyn Read + Send>, PipelineError> {
    let file = File::open(source).map_err(|e| {
        PipelineError::ChunkError(format!("Failed to open {}: {}", source.display(), e))
    })?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);

    let is_gzip = reader
        .fill_buf()
        .map_err(|e| PipelineError::ChunkError(format!("Failed to read input: {}", e)))?
        .starts_with(GZIP_MAGIC);

    if is_gzip {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

/// A chunk file that is still being written.
struct OpenChunk {
    index: u32,
    path: PathBuf,
    writer: Writer<BufWriter<File>>,
    rows: u64,
    baskets: u64,
    last_basket: Vec<u8>,
}

impl OpenChunk {
    fn create(index: u32, path: PathBuf) -> Result<Self, PipelineError> {
        let file = File::create(&path).map_err(|e| {
            PipelineError::ChunkError(format!("Failed to create chunk file: {}", e))
        })?;
        let writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(BufWriter::with_capacity(BUFFER_SIZE, file));

        Ok(Self {
            index,
            path,
            writer,
            rows: 0,
            baskets: 0,
            last_basket: Vec::new(),
        })
    }

    /// Writes one record. Returns true when the record starts a new basket.
    fn write(&mut self, record: &ByteRecord) -> Result<bool, PipelineError> {
        self.writer
            .write_byte_record(record)
            .map_err(|e| PipelineError::ChunkError(format!("Failed to write to chunk: {}", e)))?;

        let basket = &record[0];
        let new_basket = self.rows == 0 || self.last_basket != basket;
        if new_basket {
            self.last_basket.clear();
            self.last_basket.extend_from_slice(basket);
            self.baskets += 1;
        }
        self.rows += 1;
        Ok(new_basket)
    }

    fn finish(mut self) -> Result<ChunkFile, PipelineError> {
        self.writer
            .flush()
            .map_err(|e| PipelineError::ChunkError(format!("Failed to flush chunk: {}", e)))?;

        debug!(
            chunk_index = self.index,
            rows = self.rows,
            baskets = self.baskets,
            "Completed chunk"
        );

        Ok(ChunkFile {
            index: self.index,
            path: self.path,
            rows: self.rows,
            baskets: self.baskets,
        })
    }
}
