use anyhow::{bail, Context, Result};
use cnpjloader::pipeline::{self, Status};
use cnpjloader::{catalog, duck, fetch, PipelineConfig};
use duckdb::arrow::util::pretty::print_batches;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn usage() -> ! {
    eprintln!(
        "usage:
  cnpjloader month <year> <month> [dataset ...]   ingest a monthly publication
  cnpjloader url <zip-url> <dataset>              ingest a single archive URL
  cnpjloader catalog                              print the ingestion ledger (JSON lines)
  cnpjloader preview <table>                      show the first 50 rows of a table
  cnpjloader datasets                             list the configured datasets

environment:
  CNPJ_DATA_DIR   working directory (default: data)"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder().with_env_filter(env).init();

    let data_dir = std::env::var("CNPJ_DATA_DIR").unwrap_or_else(|_| "data".to_string());
    let config = PipelineConfig::new(data_dir);
    config.ensure_dirs()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("month") => {
            if args.len() < 3 {
                usage();
            }
            let year: u16 = args[1].parse().context("year must be a number")?;
            let month: u8 = args[2].parse().context("month must be a number")?;
            if !(1..=12).contains(&month) {
                bail!("month must be between 1 and 12");
            }
            let only: Vec<String> = args[3..].to_vec();
            let only = if only.is_empty() { None } else { Some(only.as_slice()) };

            let client = fetch::client()?;
            info!(year, month, "starting monthly batch");
            let outcomes =
                pipeline::prepare_all_for_month(&config, &client, year, month, only).await;

            if outcomes.is_empty() {
                bail!("no dataset matched the selection; nothing was prepared");
            }
            for outcome in &outcomes {
                let tag = match outcome.status {
                    Status::Ok => "ok",
                    Status::Warn => "warn",
                    Status::Error => "error",
                };
                println!("[{tag}] {} — {}", outcome.dataset, outcome.message);
            }
            let failed = outcomes.iter().filter(|o| o.status == Status::Error).count();
            let loaded = outcomes.iter().filter(|o| o.status == Status::Ok).count();
            println!("{loaded} loaded, {failed} failed, {} total", outcomes.len());
            if loaded == 0 && failed > 0 {
                bail!("every attempted archive failed");
            }
        }
        Some("url") => {
            if args.len() != 3 {
                usage();
            }
            let client = fetch::client()?;
            let prepared =
                pipeline::prepare_from_zip_url(&config, &client, &args[1], &args[2]).await?;
            println!(
                "{} rows loaded into table '{}' ({})",
                prepared.rows,
                args[2],
                prepared.artifact.display()
            );
        }
        Some("catalog") => {
            for entry in catalog::list(&config)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Some("preview") => {
            if args.len() != 2 {
                usage();
            }
            let table = duck::quote_ident(&args[1]);
            let batches = duck::query(&config, &format!("SELECT * FROM {table} LIMIT 50"), [])?;
            print_batches(&batches)?;
        }
        Some("datasets") => {
            for ds in pipeline::DATASETS {
                println!(
                    "{:18} {} (archives: {})",
                    ds.name,
                    ds.hint,
                    ds.archive_names().join(", ")
                );
            }
        }
        _ => usage(),
    }

    Ok(())
}
