// src/process/write.rs
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use glob::glob;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::process::RowBatch;

/// Remove segments left behind by a previous, possibly crashed, run, along
/// with any half-written scratch file that never made it to its rename.
/// Called before the first segment of a run is written so stale rows can
/// never leak into the new artifact. Deletion is best effort.
pub fn clean_stale_segments(config: &PipelineConfig, dataset: &str) -> Result<()> {
    for pattern in [config.segment_glob(dataset), config.scratch_glob(dataset)] {
        for entry in glob(&pattern)? {
            let Ok(path) = entry else { continue };
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not remove stale segment");
            } else {
                debug!(path = %path.display(), "removed stale segment");
            }
        }
    }
    Ok(())
}

fn all_utf8_schema(columns: &[String]) -> Arc<ArrowSchema> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

/// Persist one row batch as segment `tmp_{dataset}_{seq:06}.parquet`. Every
/// column is written as Utf8; the batch is discarded by the caller right
/// after. Writes to a temporary path first and renames into place.
pub fn write_segment(
    config: &PipelineConfig,
    dataset: &str,
    seq: u32,
    batch: &RowBatch,
) -> Result<PathBuf> {
    let schema = all_utf8_schema(&batch.columns);

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(batch.columns.len());
    for col in 0..batch.columns.len() {
        let mut builder = StringBuilder::new();
        for row in &batch.rows {
            builder.append_option(row.get(col).map(String::as_str));
        }
        arrays.push(Arc::new(builder.finish()));
    }
    let record_batch = RecordBatch::try_new(schema.clone(), arrays)?;

    let out_path = config.segment_path(dataset, seq);
    let temp_path = out_path.with_extension("tmp");
    let file = File::create(&temp_path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&record_batch)?;
    writer.close()?;
    fs::rename(&temp_path, &out_path)?;

    debug!(path = %out_path.display(), rows = batch.len(), "wrote segment");
    Ok(out_path)
}
