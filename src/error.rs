// src/error.rs
use thiserror::Error;

/// Failure modes of the ingestion pipeline.
///
/// The first block is the pipeline's own taxonomy; the batch orchestrator
/// downgrades `ResourceAbsent` to a `warn` outcome and everything else to an
/// `error` outcome. The transparent variants wrap collaborator errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed for {url}: {detail}")]
    FetchFailed {
        url: String,
        /// HTTP status when the server answered, `None` for transport errors.
        status: Option<u16>,
        detail: String,
    },

    /// The remote file is not published for the requested period (HTTP 404).
    #[error("resource absent: {url}")]
    ResourceAbsent { url: String },

    #[error("no eligible file inside the archive")]
    EmptyArchive,

    #[error("no rows parsed from the input")]
    EmptyInput,

    #[error("input bytes are not valid in any supported encoding")]
    DecodingFailed,

    #[error("segment {segment} is not column-compatible: {detail}")]
    SchemaMismatch { segment: String, detail: String },

    #[error("catalog write failed: {0}")]
    CatalogWriteFailed(#[source] duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Duck(#[from] duckdb::Error),

    #[error(transparent)]
    Glob(#[from] glob::PatternError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
