use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// User-friendly error presentation for the console.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── File / CSV ────────────────────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Malformed row {line} in {}: expected 2 fields, found {found}", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        found: usize,
    },

    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    // ── Stages ────────────────────────────────────────────────────────────────
    #[error("Chunking failed: {0}")]
    ChunkError(String),

    #[error("Merge failed: {0}")]
    MergeError(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Converts the error into a presentation suitable for the final console message.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            PipelineError::InvalidConfig(msg) => ErrorPresentation {
                title: "Invalid Settings".into(),
                message: msg.clone(),
                action: Some("Check the command-line arguments".into()),
            },

            PipelineError::Io(msg) => ErrorPresentation {
                title: "File Error".into(),
                message: format!("A file could not be read or written: {}", msg),
                action: Some("Check that the paths exist and are writable".into()),
            },

            PipelineError::MalformedRow { path, line, found } => ErrorPresentation {
                title: "Malformed Input".into(),
                message: format!(
                    "Row {} of {} has {} fields; every row must be basket_id,product_id.",
                    line,
                    path.display(),
                    found
                ),
                action: Some("Fix the input file and run again".into()),
            },

            PipelineError::CsvInvalid(msg) => ErrorPresentation {
                title: "Invalid CSV".into(),
                message: format!("The CSV data has a formatting problem: {}", msg),
                action: Some("Fix the input file and run again".into()),
            },

            PipelineError::ChunkError(msg) => ErrorPresentation {
                title: "Chunking Failed".into(),
                message: format!("The input could not be split into chunks: {}", msg),
                action: Some("Check the input file and the work directory".into()),
            },

            PipelineError::MergeError(msg) => ErrorPresentation {
                title: "Merge Failed".into(),
                message: format!("Per-chunk counts could not be merged: {}", msg),
                action: Some("Run again with a clean work directory".into()),
            },

            PipelineError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
