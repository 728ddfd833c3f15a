// src/catalog/mod.rs
//! Append-only ledger of every successful ingestion. The catalog is pure
//! history: live table contents are always read from the query tables, never
//! reconstructed from here, and no update or delete operation exists.

use std::path::Path;

use duckdb::{params, Connection};
use serde::Serialize;
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::process::concat::artifact_row_count;

const SCHEMA_SQL: &str = "\
CREATE SEQUENCE IF NOT EXISTS ingest_catalog_seq;
CREATE TABLE IF NOT EXISTS ingest_catalog (
    id BIGINT DEFAULT nextval('ingest_catalog_seq'),
    dataset VARCHAR NOT NULL,
    period VARCHAR NOT NULL,
    source_url VARCHAR NOT NULL,
    artifact_path VARCHAR NOT NULL,
    row_count BIGINT,
    loaded_at TIMESTAMP NOT NULL DEFAULT now()
);";

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub id: Option<i64>,
    pub dataset: String,
    /// Publication period, `YYYY-MM`.
    pub period: String,
    pub source_url: String,
    pub artifact_path: String,
    /// `None` when the artifact could not be counted at record time.
    pub row_count: Option<i64>,
    pub loaded_at: String,
}

fn open_catalog(config: &PipelineConfig) -> Result<Connection> {
    let conn =
        Connection::open(&config.db_path).map_err(PipelineError::CatalogWriteFailed)?;
    conn.execute_batch(SCHEMA_SQL)
        .map_err(PipelineError::CatalogWriteFailed)?;
    Ok(conn)
}

/// Append one entry for a finished ingestion. The row count is best effort: a
/// counting failure yields a null count, never an aborted record.
pub fn record(
    config: &PipelineConfig,
    dataset: &str,
    period: &str,
    artifact: &Path,
    source: &str,
) -> Result<()> {
    let row_count = artifact_row_count(config, artifact);
    let conn = open_catalog(config)?;
    conn.execute(
        "INSERT INTO ingest_catalog (dataset, period, source_url, artifact_path, row_count)
         VALUES (?, ?, ?, ?, ?)",
        params![
            dataset,
            period,
            source,
            artifact.to_string_lossy().to_string(),
            row_count
        ],
    )
    .map_err(PipelineError::CatalogWriteFailed)?;
    info!(dataset, period, rows = ?row_count, "catalog entry appended");
    Ok(())
}

/// All entries, most recent first.
pub fn list(config: &PipelineConfig) -> Result<Vec<CatalogEntry>> {
    let conn = open_catalog(config)?;
    let mut stmt = conn.prepare(
        "SELECT id, dataset, period, source_url, artifact_path, row_count,
                CAST(loaded_at AS VARCHAR)
         FROM ingest_catalog
         ORDER BY loaded_at DESC, id DESC",
    )?;
    let entries = stmt
        .query_map([], |row| {
            Ok(CatalogEntry {
                id: row.get(0)?,
                dataset: row.get(1)?,
                period: row.get(2)?,
                source_url: row.get(3)?,
                artifact_path: row.get(4)?,
                row_count: row.get(5)?,
                loaded_at: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, duckdb::Error>>()?;
    Ok(entries)
}
