// src/fetch/zips.rs
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{PipelineError, Result};

/// Classify an HTTP status at the fetch boundary. A 404 means the archive is
/// simply not published for the requested period and is recoverable by
/// skipping; every other non-success status is a hard fetch failure.
pub fn classify_status(url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::NOT_FOUND {
        return Err(PipelineError::ResourceAbsent {
            url: url.to_string(),
        });
    }
    if !status.is_success() {
        return Err(PipelineError::FetchFailed {
            url: url.to_string(),
            status: Some(status.as_u16()),
            detail: format!("HTTP status {status}"),
        });
    }
    Ok(())
}

fn transport_error(url: &str, err: reqwest::Error) -> PipelineError {
    PipelineError::FetchFailed {
        url: url.to_string(),
        status: err.status().map(|s| s.as_u16()),
        detail: err.to_string(),
    }
}

/// Download the given ZIP URL and save it under `dest_dir` using the original
/// filename. The body is streamed to disk so multi-gigabyte archives never sit
/// in memory. Returns the full path of the saved file.
pub async fn download_zip(
    client: &Client,
    url_str: &str,
    dest_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    let dest_dir = dest_dir.as_ref();
    let url = Url::parse(url_str)
        .map_err(|e| PipelineError::FetchFailed {
            url: url_str.to_string(),
            status: None,
            detail: e.to_string(),
        })?;
    let filename = url
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|name| !name.is_empty())
        .unwrap_or("download.zip");
    let dest_path = dest_dir.join(filename);

    if let Some(parent) = dest_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let resp = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|e| transport_error(url_str, e))?;
    classify_status(url_str, resp.status())?;

    let total = resp.content_length();
    let mut stream = resp.bytes_stream();
    let mut file = fs::File::create(&dest_path).await?;
    let mut downloaded: u64 = 0;
    let mut next_report: u64 = 64 * 1024 * 1024;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(url_str, e))?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        if downloaded >= next_report {
            debug!(url = url_str, downloaded, total, "download progress");
            next_report += 64 * 1024 * 1024;
        }
    }
    file.flush().await?;
    info!(url = url_str, bytes = downloaded, path = %dest_path.display(), "downloaded");

    Ok(dest_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_classified_as_absent() {
        let err = classify_status("http://x/Socios2.zip", StatusCode::NOT_FOUND).unwrap_err();
        assert!(matches!(err, PipelineError::ResourceAbsent { .. }));
    }

    #[test]
    fn other_failures_are_fetch_failures() {
        let err = classify_status("http://x/a.zip", StatusCode::INTERNAL_SERVER_ERROR).unwrap_err();
        match err {
            PipelineError::FetchFailed { status, .. } => assert_eq!(status, Some(500)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn success_passes_through() {
        assert!(classify_status("http://x/a.zip", StatusCode::OK).is_ok());
    }
}
