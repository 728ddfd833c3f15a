// src/fetch/urls.rs
//! URL conventions of the RFB open-data publication. The monthly directory is
//! deterministic, so there is no page scraping involved: every archive name is
//! known up front from the dataset registry.

/// Root of the monthly CNPJ publications.
pub const BASE_URL: &str = "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj/";

/// Directory holding all archives of one monthly publication under `base`,
/// e.g. `.../dados_abertos_cnpj/2025-06/`. The base is configurable so a run
/// can be pointed at a mirror.
pub fn month_dir_url_at(base: &str, year: u16, month: u8) -> String {
    format!("{base}{year:04}-{month:02}/")
}

pub fn month_dir_url(year: u16, month: u8) -> String {
    month_dir_url_at(BASE_URL, year, month)
}

/// Full URL of one archive inside a monthly directory.
pub fn archive_url_at(base: &str, year: u16, month: u8, archive_name: &str) -> String {
    format!("{}{}", month_dir_url_at(base, year, month), archive_name)
}

pub fn archive_url(year: u16, month: u8, archive_name: &str) -> String {
    archive_url_at(BASE_URL, year, month, archive_name)
}

/// Catalog period label (`YYYY-MM`) for a publication month.
pub fn period_label(year: u16, month: u8) -> String {
    format!("{year:04}-{month:02}")
}

/// Extract a `YYYY-MM` period from a source URL that follows the monthly
/// directory convention. Returns `None` for URLs laid out differently.
pub fn period_from_url(url: &str) -> Option<String> {
    url.split('/')
        .map(str::trim)
        .find(|seg| {
            seg.len() == 7
                && seg.as_bytes()[4] == b'-'
                && seg[..4].bytes().all(|b| b.is_ascii_digit())
                && seg[5..].bytes().all(|b| b.is_ascii_digit())
        })
        .map(str::to_string)
}
