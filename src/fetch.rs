// 🌐 Fetching - HTTP downloads, directory listings and ZIP payloads
//
// One request at a time, whole body in memory. Any failure is fatal for the
// import, so errors carry the URL and the transport's reason.

use anyhow::{Context, Result};
use reqwest::Url;
use scraper::{Html, Selector};
use std::collections::HashMap;
use std::io::{Cursor, Read};

use crate::error::ImportError;

/// A downloaded resource; `url` is the final URL after redirects
#[derive(Debug, Clone)]
pub struct Fetched {
    pub url: String,
    pub data: Vec<u8>,
}

/// Source of remote files. Swapped for an in-memory map in tests.
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, ImportError>;
}

// ============================================================================
// HTTP
// ============================================================================

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(HttpFetcher { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched, ImportError> {
        tracing::info!(%url, "fetching");

        let fetch_error = |e: reqwest::Error| ImportError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;

        let final_url = response.url().to_string();
        let data = response.bytes().map_err(fetch_error)?.to_vec();

        tracing::debug!(url = %final_url, bytes = data.len(), "fetched");

        Ok(Fetched {
            url: final_url,
            data,
        })
    }
}

// ============================================================================
// DIRECTORY LISTING
// ============================================================================

/// Every `<a href>` of an HTML page, in document order
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(anchors) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    document
        .select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

fn basename(path: &str) -> &str {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    path.rsplit('/').next().unwrap_or_default()
}

/// Map the two-letter state prefix of each listed file to its absolute URL.
///
/// Later links win when two files share a prefix.
pub fn index_listing(base: &str, html: &str) -> Result<HashMap<String, String>> {
    let base_url = Url::parse(base).with_context(|| format!("Invalid listing URL {}", base))?;
    let mut files = HashMap::new();

    for link in extract_links(html) {
        let name = basename(&link);
        let Some(prefix) = name.get(..2) else {
            continue;
        };
        if !prefix.chars().all(|c| c.is_ascii_alphabetic()) {
            continue;
        }

        let url = base_url
            .join(&link)
            .with_context(|| format!("Invalid link {}", link))?;
        files.insert(prefix.to_ascii_uppercase(), url.to_string());
    }

    Ok(files)
}

/// Find and download the rate file of `code` (e.g. `UT`), unpacking ZIPs
pub fn fetch_rate_file(fetcher: &dyn Fetcher, listing_url: &str, code: &str) -> Result<Fetched> {
    let listing = fetcher.fetch(listing_url)?;
    let html = String::from_utf8_lossy(&listing.data);
    let files = index_listing(&listing.url, &html)?;

    let url = files
        .get(&code.to_ascii_uppercase())
        .ok_or_else(|| ImportError::FileNotFound(code.to_string()))?;

    let fetched = fetcher.fetch(url)?;

    if fetched.url.to_ascii_lowercase().ends_with(".zip") {
        let data = extract_csv(&fetched.url, &fetched.data)?;
        return Ok(Fetched {
            url: fetched.url,
            data,
        });
    }

    Ok(fetched)
}

/// Read `<archive name>.csv` out of a ZIP, or its only CSV entry
pub fn extract_csv(url: &str, data: &[u8]) -> Result<Vec<u8>, ImportError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(data)).map_err(|e| ImportError::Archive(e.to_string()))?;

    let name = basename(url);
    let root = &name[..name.len().saturating_sub(".zip".len())];
    let expected = format!("{}.csv", root);

    let entry = if archive.file_names().any(|n| n == expected) {
        expected
    } else {
        let csvs: Vec<String> = archive
            .file_names()
            .filter(|n| n.to_ascii_lowercase().ends_with(".csv"))
            .map(str::to_string)
            .collect();
        match csvs.as_slice() {
            [only] => only.clone(),
            _ => {
                return Err(ImportError::Archive(format!(
                    "{} has no entry {} and {} other CSV entries",
                    name,
                    expected,
                    csvs.len()
                )))
            }
        }
    };

    let mut file = archive
        .by_name(&entry)
        .map_err(|e| ImportError::Archive(e.to_string()))?;
    let mut out = Vec::new();
    file.read_to_end(&mut out)
        .map_err(|e| ImportError::Archive(e.to_string()))?;

    Ok(out)
}

// ============================================================================
// IN-MEMORY FETCHER (tests)
// ============================================================================
