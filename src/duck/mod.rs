// src/duck/mod.rs
//! Thin layer over the DuckDB engine. Connections are opened and closed
//! around each discrete operation so the preparation pipeline never holds an
//! exclusive lock across a long read or write step.

use std::path::Path;

use duckdb::arrow::record_batch::RecordBatch;
use duckdb::{Connection, Params};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::Result;

/// Open a short-lived connection to the pipeline database.
pub fn open(config: &PipelineConfig) -> Result<Connection> {
    Ok(Connection::open(&config.db_path)?)
}

/// Double-quote an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote escape a path for embedding in SQL literals.
pub fn quote_path(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "''")
}

/// (Re)create `table` from a parquet artifact. With `replace`, any previous
/// table of that name is dropped first; dropping a missing table is not an
/// error. The drop, schema-only create and bulk insert run in one transaction,
/// so readers see either the old or the new row set, never a half-loaded one.
pub fn ensure_table_from_parquet(
    config: &PipelineConfig,
    table: &str,
    parquet_path: &Path,
    replace: bool,
) -> Result<()> {
    let conn = open(config)?;
    let t = quote_ident(table);
    let p = quote_path(parquet_path);

    let mut sql = String::from("BEGIN;\n");
    if replace {
        sql.push_str(&format!("DROP TABLE IF EXISTS {t};\n"));
    }
    sql.push_str(&format!(
        "CREATE TABLE IF NOT EXISTS {t} AS SELECT * FROM parquet_scan('{p}') LIMIT 0;\n"
    ));
    sql.push_str(&format!(
        "INSERT INTO {t} SELECT * FROM parquet_scan('{p}');\n"
    ));
    sql.push_str("COMMIT;");
    conn.execute_batch(&sql)?;

    info!(table, artifact = %parquet_path.display(), replace, "table registered");
    Ok(())
}

/// Run an ad-hoc statement with positional parameters, collecting the result
/// as arrow batches.
pub fn query(config: &PipelineConfig, sql: &str, params: impl Params) -> Result<Vec<RecordBatch>> {
    let conn = open(config)?;
    let mut stmt = conn.prepare(sql)?;
    let batches: Vec<RecordBatch> = stmt.query_arrow(params)?.collect();
    Ok(batches)
}

pub fn table_row_count(config: &PipelineConfig, table: &str) -> Result<i64> {
    let conn = open(config)?;
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn table_exists(config: &PipelineConfig, table: &str) -> Result<bool> {
    let conn = open(config)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
