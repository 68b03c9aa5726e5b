//! Paginated search over a remote DKAN catalog.
//!
//! DKAN has no cursor, so the full list is read with `limit`/`offset` pages
//! sorted by id while the remote may be changing. Sorting by id keeps the
//! damage predictable: an insertion shifts later records forward, so some
//! are seen twice and get deduplicated; a deletion shifts them back, so some
//! are missed until the next harvest.

use std::collections::HashSet;

use serde_json::Value;
use url::Url;

use crate::error::AppError;
use crate::traits::ContentFetcher;

/// Number of records requested per page.
pub const PAGE_SIZE: usize = 100;

/// Action exposing full package records, resources included.
pub const SEARCH_ACTION: &str = "current_package_list_with_resources";

/// One package record as the remote returned it.
///
/// Only the `id` is checked while paging; the typed [`RemotePackage`]
/// is built per record at conversion time, so one odd field cannot fail a
/// whole page.
///
/// [`RemotePackage`]: crate::models::RemotePackage
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub id: String,
    pub value: Value,
}

/// Reads every package of a remote catalog, page by page.
#[derive(Clone)]
pub struct PackageSearcher<F: ContentFetcher> {
    fetcher: F,
    page_size: usize,
}

impl<F: ContentFetcher> PackageSearcher<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            page_size: PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns all records matching `fq_terms`, without duplicate ids.
    ///
    /// # Errors
    ///
    /// [`AppError::Search`] when a page cannot be fetched, is not JSON, has no
    /// `result` array, contains a record without a string `id`, or is
    /// byte-identical to the page before it (the remote ignores `offset`).
    pub async fn search(
        &self,
        base_url: &str,
        fq_terms: &[String],
    ) -> Result<Vec<RemoteRecord>, AppError> {
        let mut records = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut previous: Option<Vec<u8>> = None;
        let mut offset = 0;

        loop {
            let url = search_url(base_url, fq_terms, self.page_size, offset)?;
            tracing::debug!(url = %url, "Searching for DKAN datasets");

            let content = self.fetcher.fetch(url.as_str()).await.map_err(|e| {
                AppError::Search(format!(
                    "Error sending request to search remote instance {} using URL {}: {}",
                    base_url, url, e
                ))
            })?;

            if previous.as_deref() == Some(content.as_slice()) {
                return Err(AppError::Search(format!(
                    "The paging doesn't seem to work. URL: {}",
                    url
                )));
            }

            let page = parse_page(&content)?;
            if page.is_empty() {
                break;
            }

            let page_len = page.len();
            let mut duplicates = 0;
            for record in page {
                if seen.insert(record.id.clone()) {
                    records.push(record);
                } else {
                    duplicates += 1;
                }
            }
            if duplicates > 0 {
                tracing::debug!(offset, duplicates, "Dropped records already seen on earlier pages");
            }
            tracing::debug!(offset, page_len, total = records.len(), "Search page processed");

            previous = Some(content);
            offset += self.page_size;
        }

        Ok(records)
    }
}

/// Builds the URL of one search page.
///
/// ```
/// use dkan_harvest_core::search::search_url;
///
/// let url = search_url("https://data.example.gov/", &["organization:parks".to_string()], 100, 200).unwrap();
/// assert_eq!(
///     url.as_str(),
///     "https://data.example.gov/api/3/action/current_package_list_with_resources\
///      ?limit=100&offset=200&sort=id+asc&fq=organization%3Aparks"
/// );
/// ```
pub fn search_url(
    base_url: &str,
    fq_terms: &[String],
    limit: usize,
    offset: usize,
) -> Result<Url, AppError> {
    let endpoint = format!(
        "{}/api/3/action/{}",
        base_url.trim_end_matches('/'),
        SEARCH_ACTION
    );
    let mut url =
        Url::parse(&endpoint).map_err(|e| AppError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("sort", "id asc");
        if !fq_terms.is_empty() {
            query.append_pair("fq", &fq_terms.join(" "));
        }
    }
    Ok(url)
}

/// Extracts the package records of one page.
///
/// Some DKAN versions wrap the page in an extra list (`"result": [[...]]`);
/// the inner lists are flattened.
fn parse_page(content: &[u8]) -> Result<Vec<RemoteRecord>, AppError> {
    let response: Value = serde_json::from_slice(content).map_err(|_| {
        AppError::Search(format!(
            "Response from remote was not JSON: {}",
            preview(content)
        ))
    })?;

    let items = match response {
        Value::Object(mut map) => match map.remove("result") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AppError::Search(format!(
                    "Response JSON did not contain a result list: {}",
                    preview(content)
                )));
            }
        },
        _ => {
            return Err(AppError::Search(format!(
                "Response JSON is not an object: {}",
                preview(content)
            )));
        }
    };

    let items: Vec<Value> = if items.first().is_some_and(Value::is_array) {
        items
            .into_iter()
            .flat_map(|item| match item {
                Value::Array(inner) => inner,
                other => vec![other],
            })
            .collect()
    } else {
        items
    };

    items
        .into_iter()
        .map(|value| -> Result<RemoteRecord, AppError> {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    AppError::Search(format!(
                        "Package record without a string id: {}",
                        preview(value.to_string().as_bytes())
                    ))
                })?;
            Ok(RemoteRecord { id, value })
        })
        .collect()
}

fn preview(content: &[u8]) -> String {
    String::from_utf8_lossy(content).chars().take(200).collect()
}
