use std::path::PathBuf;

use crate::error::PipelineError;

/// Default rows per chunk file.
pub const DEFAULT_LINE_LIMIT: u64 = 1000;

/// Settings for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Input CSV of `basket_id,product_id` rows (gzip or plain).
    pub input: PathBuf,
    /// Destination of the final report.
    pub report_path: PathBuf,
    /// Approximate rows per chunk file.
    pub line_limit: u64,
    /// Directory holding chunk and pair-count files.
    pub work_dir: PathBuf,
    /// Maximum chunks counted concurrently.
    pub workers: usize,
    /// Leave intermediate files in place after the run.
    pub keep_intermediates: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("data_1.csv.gz"),
            report_path: PathBuf::from("report.csv"),
            line_limit: DEFAULT_LINE_LIMIT,
            work_dir: PathBuf::from("."),
            workers: default_workers(),
            keep_intermediates: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a config for the given input and report paths with default limits.
    pub fn new(input: impl Into<PathBuf>, report_path: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            report_path: report_path.into(),
            ..Self::default()
        }
    }

    pub fn line_limit(mut self, line_limit: u64) -> Self {
        self.line_limit = line_limit;
        self
    }

    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.line_limit == 0 {
            return Err(PipelineError::InvalidConfig(
                "line_limit must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// One worker per available core, falling back to a single worker.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.input, PathBuf::from("data_1.csv.gz"));
        assert_eq!(config.report_path, PathBuf::from("report.csv"));
        assert_eq!(config.line_limit, 1000);
        assert!(config.workers >= 1);
        assert!(!config.keep_intermediates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = PipelineConfig::new("in.csv.gz", "out.csv")
            .line_limit(50)
            .work_dir("/tmp/chunks")
            .workers(3)
            .keep_intermediates(true);

        assert_eq!(config.input, PathBuf::from("in.csv.gz"));
        assert_eq!(config.report_path, PathBuf::from("out.csv"));
        assert_eq!(config.line_limit, 50);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/chunks"));
        assert_eq!(config.workers, 3);
        assert!(config.keep_intermediates);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        assert!(matches!(
            PipelineConfig::default().line_limit(0).validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert!(matches!(
            PipelineConfig::default().workers(0).validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
