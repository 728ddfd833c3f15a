// src/process/concat.rs
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::duck;
use crate::error::{PipelineError, Result};

/// Every segment must expose the same column names in the same order; no
/// column union is attempted.
fn check_segment_schemas(segments: &[PathBuf]) -> Result<()> {
    let mut expected: Option<Vec<String>> = None;
    for segment in segments {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(segment)?)?;
        let columns: Vec<String> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        match &expected {
            None => expected = Some(columns),
            Some(first) if *first != columns => {
                return Err(PipelineError::SchemaMismatch {
                    segment: segment.display().to_string(),
                    detail: format!("expected columns {first:?}, found {columns:?}"),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Merge every segment of `dataset` into its canonical artifact, then delete
/// the consumed segments. The engine streams the glob scan, so the chunks are
/// never materialized in memory at once.
pub fn concat_segments(config: &PipelineConfig, dataset: &str) -> Result<PathBuf> {
    let pattern = config.segment_glob(dataset);
    let mut segments: Vec<PathBuf> = glob(&pattern)?.filter_map(|e| e.ok()).collect();
    segments.sort();
    if segments.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    check_segment_schemas(&segments)?;

    let artifact = config.artifact_path(dataset);
    {
        let conn = duck::open(config)?;
        conn.execute(
            &format!(
                "COPY (SELECT * FROM parquet_scan('{}')) TO '{}' (FORMAT PARQUET)",
                pattern.replace('\'', "''"),
                duck::quote_path(&artifact),
            ),
            [],
        )?;
    }

    for segment in &segments {
        if let Err(e) = fs::remove_file(segment) {
            warn!(path = %segment.display(), error = %e, "could not remove consumed segment");
        }
    }
    info!(
        dataset,
        segments = segments.len(),
        artifact = %artifact.display(),
        "segments concatenated"
    );
    Ok(artifact)
}

/// Best-effort row count of a parquet artifact, used by the catalog.
pub fn artifact_row_count(config: &PipelineConfig, artifact: &Path) -> Option<i64> {
    let count = (|| -> Result<i64> {
        let conn = duck::open(config)?;
        let n = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM parquet_scan('{}')",
                duck::quote_path(artifact)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    })();
    match count {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(artifact = %artifact.display(), error = %e, "row count unavailable");
            None
        }
    }
}
