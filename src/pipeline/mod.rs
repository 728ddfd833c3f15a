// src/pipeline/mod.rs
//! End-to-end ingestion runs: payload selection, chunked parse, segment
//! writing, concatenation, table registration and catalog append. The batch
//! orchestrator drives one run per (dataset, archive) pair and never aborts
//! the month on a per-item failure.

use std::fs;
use std::io::{Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::catalog;
use crate::config::PipelineConfig;
use crate::duck;
use crate::error::{PipelineError, Result};
use crate::extract;
use crate::fetch::{urls, zips};
use crate::process::{concat, write, ChunkReader};

/// One logical dataset of the monthly publication: its table name, the
/// keywords that locate its payload inside an archive, and the archive names
/// the RFB publishes it under.
#[derive(Debug)]
pub struct Dataset {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
    pub hint: &'static str,
    archive_stem: &'static str,
    parts: u8,
}

impl Dataset {
    /// Expected archive file names for any month. The big registries are
    /// split into ten numbered parts; domain tables ship as a single ZIP.
    pub fn archive_names(&self) -> Vec<String> {
        if self.parts <= 1 {
            vec![format!("{}.zip", self.archive_stem)]
        } else {
            (0..self.parts)
                .map(|i| format!("{}{}.zip", self.archive_stem, i))
                .collect()
        }
    }
}

pub const DATASETS: &[Dataset] = &[
    Dataset {
        name: "empresas",
        keywords: &["empresas", "empresa", "emprecsv"],
        hint: "Company register.",
        archive_stem: "Empresas",
        parts: 10,
    },
    Dataset {
        name: "estabelecimentos",
        keywords: &["estabelec", "estabelecimentos"],
        hint: "Establishments: units, CNAE, address.",
        archive_stem: "Estabelecimentos",
        parts: 10,
    },
    Dataset {
        name: "socios",
        keywords: &["socios", "sócios", "socio"],
        hint: "Partners (individuals, companies, foreign).",
        archive_stem: "Socios",
        parts: 10,
    },
    Dataset {
        name: "simples",
        keywords: &["simples", "mei"],
        hint: "Simples/MEI tax option.",
        archive_stem: "Simples",
        parts: 1,
    },
    Dataset {
        name: "paises",
        keywords: &["paises", "países", "pais"],
        hint: "Country domain table.",
        archive_stem: "Paises",
        parts: 1,
    },
    Dataset {
        name: "municipios",
        keywords: &["municipio", "municípios", "municipios"],
        hint: "Municipality domain table.",
        archive_stem: "Municipios",
        parts: 1,
    },
    Dataset {
        name: "qualificacoes",
        keywords: &["qualificacao", "qualificações", "qualificacoes"],
        hint: "Partner qualification domain table.",
        archive_stem: "Qualificacoes",
        parts: 1,
    },
    Dataset {
        name: "naturezas",
        keywords: &["natureza", "naturezas"],
        hint: "Legal nature domain table.",
        archive_stem: "Naturezas",
        parts: 1,
    },
    Dataset {
        name: "cnaes",
        keywords: &["cnae", "cnaes"],
        hint: "CNAE activity domain table.",
        archive_stem: "Cnaes",
        parts: 1,
    },
];

pub fn dataset(name: &str) -> Option<&'static Dataset> {
    DATASETS.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

fn keywords_for(name: &str) -> Vec<&str> {
    match dataset(name) {
        Some(ds) => ds.keywords.to_vec(),
        None => vec![name],
    }
}

fn current_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Durable results of one ingestion run.
#[derive(Debug)]
pub struct Prepared {
    pub artifact: PathBuf,
    pub rows: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warn,
    Error,
}

/// Per-attempt record of a batch run, in the order attempted.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub status: Status,
    pub dataset: String,
    pub source: String,
    pub message: String,
}

/// Core of a run: stale-segment cleanup, chunked read, one parquet segment
/// per batch, concatenation into the canonical artifact.
fn ingest_stream<R: Read + Seek>(
    config: &PipelineConfig,
    dataset_name: &str,
    input: R,
) -> Result<Prepared> {
    write::clean_stale_segments(config, dataset_name)?;

    let reader = ChunkReader::new(input, config.chunk_size)?;
    let mut rows: u64 = 0;
    let mut seq: u32 = 0;
    for batch in reader {
        let batch = batch?;
        write::write_segment(config, dataset_name, seq, &batch)?;
        rows += batch.len() as u64;
        seq += 1;
    }
    if rows == 0 {
        return Err(PipelineError::EmptyInput);
    }

    let artifact = concat::concat_segments(config, dataset_name)?;
    Ok(Prepared { artifact, rows })
}

fn register_and_record(
    config: &PipelineConfig,
    dataset_name: &str,
    prepared: &Prepared,
    period: &str,
    source: &str,
) -> Result<()> {
    duck::ensure_table_from_parquet(config, dataset_name, &prepared.artifact, true)?;
    catalog::record(config, dataset_name, period, &prepared.artifact, source)?;
    Ok(())
}

/// Ingest an already-downloaded ZIP archive from disk.
#[instrument(level = "info", skip(config, zip_path), fields(dataset = dataset_name))]
pub fn prepare_from_zip_path(
    config: &PipelineConfig,
    dataset_name: &str,
    zip_path: &Path,
    source: &str,
    period: &str,
) -> Result<Prepared> {
    config.ensure_dirs()?;
    let zip_bytes = fs::read(zip_path)?;
    let payload = extract::select_payload(&zip_bytes, &keywords_for(dataset_name))?;
    let prepared = ingest_stream(config, dataset_name, Cursor::new(payload))?;
    register_and_record(config, dataset_name, &prepared, period, source)?;
    info!(rows = prepared.rows, artifact = %prepared.artifact.display(), "dataset prepared");
    Ok(prepared)
}

/// Ingest a ZIP archive supplied as bytes (upload path).
pub fn prepare_from_zip_bytes(
    config: &PipelineConfig,
    dataset_name: &str,
    zip_bytes: &[u8],
) -> Result<Prepared> {
    config.ensure_dirs()?;
    let payload = extract::select_payload(zip_bytes, &keywords_for(dataset_name))?;
    let prepared = ingest_stream(config, dataset_name, Cursor::new(payload))?;
    register_and_record(
        config,
        dataset_name,
        &prepared,
        &current_period(),
        "upload:zip",
    )?;
    Ok(prepared)
}

/// Ingest a bare semicolon-delimited file supplied as bytes (upload path).
pub fn prepare_from_csv_bytes(
    config: &PipelineConfig,
    dataset_name: &str,
    csv_bytes: &[u8],
) -> Result<Prepared> {
    config.ensure_dirs()?;
    let prepared = ingest_stream(config, dataset_name, Cursor::new(csv_bytes))?;
    register_and_record(
        config,
        dataset_name,
        &prepared,
        &current_period(),
        "upload:csv",
    )?;
    Ok(prepared)
}

/// Download one archive and run the full pipeline on it. The downloaded ZIP is
/// transient and removed whether or not the run succeeds.
pub async fn prepare_from_zip_url(
    config: &PipelineConfig,
    client: &Client,
    url: &str,
    dataset_name: &str,
) -> Result<Prepared> {
    config.ensure_dirs()?;
    let zip_path = zips::download_zip(client, url, &config.data_dir).await?;
    let period = urls::period_from_url(url).unwrap_or_else(current_period);
    let result = prepare_from_zip_path(config, dataset_name, &zip_path, url, &period);
    if let Err(e) = fs::remove_file(&zip_path) {
        warn!(path = %zip_path.display(), error = %e, "could not remove downloaded archive");
    }
    result
}

/// Drive the pipeline across every targeted dataset and expected archive of
/// one monthly publication, strictly one at a time. A 404 becomes a `warn`
/// outcome, any other failure an `error` outcome; the batch always continues.
/// There is no automatic retry.
pub async fn prepare_all_for_month(
    config: &PipelineConfig,
    client: &Client,
    year: u16,
    month: u8,
    only: Option<&[String]>,
) -> Vec<Outcome> {
    let period = urls::period_label(year, month);
    let mut outcomes = Vec::new();

    for ds in DATASETS {
        if let Some(names) = only {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(ds.name)) {
                continue;
            }
        }
        for archive_name in ds.archive_names() {
            let url = urls::archive_url_at(&config.base_url, year, month, &archive_name);
            let outcome = match prepare_from_zip_url(config, client, &url, ds.name).await {
                Ok(prepared) => Outcome {
                    status: Status::Ok,
                    dataset: ds.name.to_string(),
                    source: url,
                    message: format!(
                        "{} rows loaded into table '{}' from {}",
                        prepared.rows, ds.name, archive_name
                    ),
                },
                Err(PipelineError::ResourceAbsent { .. }) => Outcome {
                    status: Status::Warn,
                    dataset: ds.name.to_string(),
                    source: url,
                    message: format!("{archive_name} is not published for {period}; skipped"),
                },
                Err(e) => Outcome {
                    status: Status::Error,
                    dataset: ds.name.to_string(),
                    source: url,
                    message: e.to_string(),
                },
            };
            match outcome.status {
                Status::Ok => info!(dataset = ds.name, "{}", outcome.message),
                _ => warn!(dataset = ds.name, "{}", outcome.message),
            }
            outcomes.push(outcome);
        }
    }

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::RowBatch;
    use anyhow::Result;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write as _};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::CompressionMethod;

    /// Minimal HTTP stub standing in for the publication mirror: each routed
    /// archive name gets its configured status and body, everything else 404.
    fn spawn_archive_server(responses: HashMap<String, (u16, Vec<u8>)>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let Ok(clone) = stream.try_clone() else { continue };
                let mut reader = BufReader::new(clone);
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                loop {
                    let mut header = String::new();
                    match reader.read_line(&mut header) {
                        Ok(_) if header == "\r\n" || header.is_empty() => break,
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
                let path = request_line.split_whitespace().nth(1).unwrap_or("/");
                let name = path.rsplit('/').next().unwrap_or("").to_string();
                let (status, body) = responses.get(&name).cloned().unwrap_or((404, Vec::new()));
                let reason = match status {
                    200 => "OK",
                    500 => "Internal Server Error",
                    _ => "Not Found",
                };
                let head = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(&body);
            }
        });
        addr
    }

    fn build_zip(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options: FileOptions<'_, ()> =
                FileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                zip.start_file(name.to_string(), options.clone())?;
                zip.write_all(content)?;
            }
            zip.finish()?;
        }
        Ok(buf)
    }

    fn company_csv(rows: usize) -> String {
        let mut csv = String::from("cnpj;razao_social;natureza\n");
        for i in 0..rows {
            csv.push_str(&format!("{i:014};EMPRESA {i};2062\n"));
        }
        csv
    }

    #[test]
    fn extensionless_payload_flows_into_a_queryable_table() -> Result<()> {
        let dir = TempDir::new()?;
        let config = PipelineConfig::new(dir.path()).with_chunk_size(1_000);
        let zip = build_zip(&[("DADOS", company_csv(2_500).as_bytes())])?;

        let prepared = prepare_from_zip_bytes(&config, "empresas", &zip)?;
        assert_eq!(prepared.rows, 2_500);
        assert_eq!(duck::table_row_count(&config, "empresas")?, 2_500);
        assert!(config.artifact_path("empresas").exists());
        // All transient segments were consumed by the concatenation.
        assert!(!config.segment_path("empresas", 0).exists());

        let entries = catalog::list(&config)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].row_count, Some(2_500));
        assert_eq!(entries[0].source_url, "upload:zip");
        Ok(())
    }

    #[test]
    fn rerunning_replaces_instead_of_duplicating() -> Result<()> {
        let dir = TempDir::new()?;
        let config = PipelineConfig::new(dir.path()).with_chunk_size(100);
        let zip = build_zip(&[("DADOS", company_csv(250).as_bytes())])?;

        prepare_from_zip_bytes(&config, "empresas", &zip)?;
        prepare_from_zip_bytes(&config, "empresas", &zip)?;
        assert_eq!(duck::table_row_count(&config, "empresas")?, 250);
        // History still versions both runs.
        assert_eq!(catalog::list(&config)?.len(), 2);
        Ok(())
    }

    #[test]
    fn stale_segments_from_a_crashed_run_are_excluded() -> Result<()> {
        let dir = TempDir::new()?;
        let config = PipelineConfig::new(dir.path()).with_chunk_size(100);
        // Leftover from an interrupted run, same dataset and naming pattern.
        let stale = RowBatch {
            columns: vec!["cnpj".into(), "razao_social".into(), "natureza".into()],
            rows: vec![vec!["x".into(), "y".into(), "z".into()]; 40],
        };
        write::write_segment(&config, "empresas", 99, &stale)?;

        let prepared = prepare_from_csv_bytes(&config, "empresas", company_csv(10).as_bytes())?;
        assert_eq!(prepared.rows, 10);
        assert_eq!(duck::table_row_count(&config, "empresas")?, 10);
        Ok(())
    }

    #[test]
    fn zero_row_input_touches_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let config = PipelineConfig::new(dir.path());

        let err = prepare_from_csv_bytes(&config, "empresas", b"cnpj;razao_social\n").unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));
        assert!(!config.artifact_path("empresas").exists());
        assert!(!duck::table_exists(&config, "empresas")?);
        assert!(catalog::list(&config)?.is_empty());
        Ok(())
    }

    #[test]
    fn keyword_entry_is_preferred_over_bigger_noise() -> Result<()> {
        let dir = TempDir::new()?;
        let config = PipelineConfig::new(dir.path());
        let noise = vec![b'#'; 50_000];
        let zip = build_zip(&[
            ("LEIAME.txt", noise.as_slice()),
            ("K3241.K03200Y0.D50614.EMPRECSV", company_csv(5).as_bytes()),
        ])?;

        let prepared = prepare_from_zip_bytes(&config, "empresas", &zip)?;
        assert_eq!(prepared.rows, 5);
        Ok(())
    }

    #[test]
    fn latin1_archives_ingest_cleanly() -> Result<()> {
        let dir = TempDir::new()?;
        let config = PipelineConfig::new(dir.path());
        let mut csv = Vec::new();
        csv.extend_from_slice(b"codigo;descricao\n");
        csv.extend_from_slice(b"0001;Produ\xe7\xe3o agr\xedcola\n");
        let zip = build_zip(&[("CNAECSV", &csv)])?;

        let prepared = prepare_from_zip_bytes(&config, "cnaes", &zip)?;
        assert_eq!(prepared.rows, 1);
        let conn = duck::open(&config)?;
        let descricao: String =
            conn.query_row("SELECT descricao FROM cnaes", [], |row| row.get(0))?;
        assert_eq!(descricao, "Produção agrícola");
        Ok(())
    }

    #[tokio::test]
    async fn month_batch_downgrades_failures_and_continues() -> Result<()> {
        let dir = TempDir::new()?;
        let zip = build_zip(&[("SIMPLES", company_csv(8).as_bytes())])?;
        let mut responses = HashMap::new();
        responses.insert("Simples.zip".to_string(), (200, zip));
        responses.insert("Naturezas.zip".to_string(), (500, Vec::new()));
        // Cnaes.zip has no route and answers 404.
        let addr = spawn_archive_server(responses);

        let config =
            PipelineConfig::new(dir.path()).with_base_url(format!("http://{addr}/"));
        let client = crate::fetch::client()?;
        let only = vec![
            "simples".to_string(),
            "naturezas".to_string(),
            "cnaes".to_string(),
        ];
        let outcomes =
            prepare_all_for_month(&config, &client, 2025, 6, Some(&only)).await;

        let statuses: Vec<Status> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(statuses, vec![Status::Ok, Status::Error, Status::Warn]);
        // The batch ran on past the hard failure.
        assert_eq!(outcomes[2].dataset, "cnaes");
        assert_eq!(duck::table_row_count(&config, "simples")?, 8);

        let entries = catalog::list(&config)?;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].period, "2025-06");
        Ok(())
    }

    #[tokio::test]
    async fn missing_monthly_parts_warn_and_the_batch_moves_on() -> Result<()> {
        let dir = TempDir::new()?;
        let socios_zip = build_zip(&[("SOCIOCSV", company_csv(4).as_bytes())])?;
        let cnaes_zip = build_zip(&[("CNAECSV", company_csv(2).as_bytes())])?;
        let mut responses = HashMap::new();
        responses.insert("Socios0.zip".to_string(), (200, socios_zip));
        responses.insert("Cnaes.zip".to_string(), (200, cnaes_zip));
        // Socios1..9 are not published this month and answer 404.
        let addr = spawn_archive_server(responses);

        let config =
            PipelineConfig::new(dir.path()).with_base_url(format!("http://{addr}/"));
        let client = crate::fetch::client()?;
        let only = vec!["socios".to_string(), "cnaes".to_string()];
        let outcomes =
            prepare_all_for_month(&config, &client, 2025, 6, Some(&only)).await;

        assert_eq!(outcomes.len(), 11);
        assert_eq!(outcomes[0].status, Status::Ok);
        assert!(outcomes[1..10].iter().all(|o| o.status == Status::Warn));
        assert_eq!(outcomes[10].status, Status::Ok);
        assert_eq!(outcomes[10].dataset, "cnaes");
        assert_eq!(duck::table_row_count(&config, "socios")?, 4);
        assert_eq!(duck::table_row_count(&config, "cnaes")?, 2);
        Ok(())
    }

    #[test]
    fn registry_expands_numbered_archives() {
        let socios = dataset("socios").unwrap();
        let names = socios.archive_names();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "Socios0.zip");
        assert_eq!(names[9], "Socios9.zip");
        assert_eq!(dataset("simples").unwrap().archive_names(), vec!["Simples.zip"]);
        assert!(dataset("desconhecido").is_none());
    }
}
