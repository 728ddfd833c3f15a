// src/config.rs
use std::fs;
use std::path::PathBuf;

use crate::fetch::urls::BASE_URL;

/// Explicit configuration passed into every pipeline component; there is no
/// process-wide working directory.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Working directory: database file, canonical artifacts, transient
    /// segments and downloaded archives all live here.
    pub data_dir: PathBuf,
    /// DuckDB database file backing the query tables and the catalog.
    pub db_path: PathBuf,
    /// Maximum rows per in-memory batch / per parquet segment.
    pub chunk_size: usize,
    /// Root of the monthly publications; overridable to ingest from a mirror.
    pub base_url: String,
}

pub const DEFAULT_CHUNK_SIZE: usize = 400_000;

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let db_path = data_dir.join("cnpj.duckdb");
        Self {
            data_dir,
            db_path,
            chunk_size: DEFAULT_CHUNK_SIZE,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Canonical columnar artifact for a dataset: `{dataset}.parquet`.
    pub fn artifact_path(&self, dataset: &str) -> PathBuf {
        self.data_dir.join(format!("{dataset}.parquet"))
    }

    /// Transient per-run segment: `tmp_{dataset}_{seq:06}.parquet`.
    pub fn segment_path(&self, dataset: &str, seq: u32) -> PathBuf {
        self.data_dir.join(format!("tmp_{dataset}_{seq:06}.parquet"))
    }

    /// Glob pattern matching every segment of a dataset, current or stale.
    pub fn segment_glob(&self, dataset: &str) -> String {
        self.data_dir
            .join(format!("tmp_{dataset}_*.parquet"))
            .to_string_lossy()
            .into_owned()
    }

    /// Glob pattern matching half-written scratch files a crash may have left
    /// next to the segments.
    pub fn scratch_glob(&self, dataset: &str) -> String {
        self.data_dir
            .join(format!("tmp_{dataset}_*.tmp"))
            .to_string_lossy()
            .into_owned()
    }
}
