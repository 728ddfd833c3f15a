// src/extract/mod.rs
//! Payload selection inside an RFB archive. The internal file usually carries
//! no extension at all, so entries are ranked by name keywords and size
//! instead of suffix.

use std::io::{Cursor, Read};

use encoding_rs::WINDOWS_1252;
use tracing::{debug, trace};
use zip::ZipArchive;

use crate::error::{PipelineError, Result};

/// List the names of every non-directory entry, archive order. Diagnostic
/// helper for operators inspecting an unfamiliar archive.
pub fn list_entries(zip_bytes: &[u8]) -> Result<Vec<String>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;
    let mut names = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_file() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

/// Pick the entry most likely to be the tabular payload and return its
/// decompressed bytes.
///
/// Candidates are the non-directory entries; when any entry name contains one
/// of `keywords` (case-insensitive), only those compete. The winner is the
/// candidate with the largest uncompressed size, ties going to the lowest
/// archive index.
pub fn select_payload(zip_bytes: &[u8], keywords: &[&str]) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;

    let mut files: Vec<(usize, String, u64)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_file() {
            files.push((i, entry.name().to_string(), entry.size()));
        }
    }
    if files.is_empty() {
        return Err(PipelineError::EmptyArchive);
    }

    let keys: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let matching: Vec<&(usize, String, u64)> = files
        .iter()
        .filter(|(_, name, _)| {
            let lower = name.to_lowercase();
            keys.iter().any(|k| lower.contains(k))
        })
        .collect();
    let candidates: Vec<&(usize, String, u64)> = if matching.is_empty() {
        files.iter().collect()
    } else {
        matching
    };

    // Strict comparison keeps the first-seen entry on equal sizes.
    let mut best = candidates[0];
    for &cand in &candidates[1..] {
        if cand.2 > best.2 {
            best = cand;
        }
    }
    let (index, name, size) = (best.0, best.1.clone(), best.2);
    debug!(entry = %name, size, "selected archive payload");

    let mut entry = archive.by_index(index)?;
    let mut payload = Vec::with_capacity(size as usize);
    entry.read_to_end(&mut payload)?;

    // Best-effort peek at the head of the payload for fail-fast diagnostics;
    // never blocks selection.
    let head = &payload[..payload.len().min(4096)];
    let (text, _, _) = WINDOWS_1252.decode(head);
    trace!(first_line = text.lines().next().unwrap_or_default(), "payload sample");

    Ok(payload)
}
