// src/fetch/mod.rs
pub mod urls;
pub mod zips;

use std::time::Duration;

use reqwest::Client;

/// Fixed network timeout; parsing and disk I/O are not time-bounded.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client shared by every download of a run.
pub fn client() -> reqwest::Result<Client> {
    Client::builder().timeout(FETCH_TIMEOUT).build()
}
