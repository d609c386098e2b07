//! Generic JSON-API Driver
//!
//! The one scraper driver shipped with the core. A scraper directory that
//! declares `endpoints.json` as its entry point gets this driver: it walks
//! the declared endpoints, fetches each as JSON, and emits every element of
//! the record array as a raw record. Source-specific scrapers plug in
//! through the same `Scraper` trait and are wired by the registry.

use super::http_client::get_client;
use super::rate_limiter::RateLimiter;
use super::{
    CancelToken, RawKind, RawPayload, RawRecord, RecordSender, RunBudget, Scraper, ScrapeError,
    ScrapeResult,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// One declared source endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub url: String,

    /// What the records at this endpoint describe
    pub kind: RawKind,

    /// Key of the record array inside a JSON object response; a bare JSON
    /// array response needs none
    #[serde(default)]
    pub records_key: Option<String>,
}

/// Entry-point file shape (`endpoints.json`)
#[derive(Debug, Deserialize)]
struct EntryFile {
    endpoints: Vec<Endpoint>,
}

/// Scraper that extracts records from declared JSON endpoints
#[derive(Debug)]
pub struct JsonApiScraper {
    id: String,
    endpoints: Vec<Endpoint>,
    limiter: RateLimiter,
}

impl JsonApiScraper {
    #[must_use]
    pub fn new(id: impl Into<String>, endpoints: Vec<Endpoint>, limiter: RateLimiter) -> Self {
        Self {
            id: id.into(),
            endpoints,
            limiter,
        }
    }

    /// Build from a scraper directory's `endpoints.json`
    pub fn from_entry_file(
        id: impl Into<String>,
        path: &Path,
        limiter: RateLimiter,
    ) -> ScrapeResult<Self> {
        let id = id.into();
        let content = std::fs::read_to_string(path).map_err(|_| ScrapeError::MissingFile {
            path: path.display().to_string(),
        })?;
        let entry: EntryFile = serde_json::from_str(&content).map_err(|e| {
            ScrapeError::parse("JSON", path.display().to_string(), e.to_string())
        })?;
        Ok(Self::new(id, entry.endpoints, limiter))
    }

    async fn fetch_endpoint(
        &self,
        endpoint: &Endpoint,
        cancel: &CancelToken,
        tx: &RecordSender,
        remaining: &mut usize,
    ) -> ScrapeResult<()> {
        let url = url::Url::parse(&endpoint.url).map_err(|e| {
            ScrapeError::parse("URL", endpoint.url.clone(), e.to_string())
        })?;
        let host = url.host_str().unwrap_or("unknown").to_string();

        // one request in flight per (host, scraper), then a bucket token
        let _flight = self.limiter.begin_flight(&host, &self.id).await;
        self.limiter.acquire(&host).await;

        if cancel.is_cancelled() {
            return Ok(());
        }

        tracing::debug!(scraper = %self.id, url = %endpoint.url, "fetching endpoint");

        let response = get_client().get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::from_status(status.as_u16(), endpoint.url.clone()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ScrapeError::parse("JSON", endpoint.url.clone(), e.to_string()))?;

        let records = match (&endpoint.records_key, &body) {
            (Some(key), serde_json::Value::Object(map)) => {
                map.get(key).and_then(serde_json::Value::as_array).ok_or_else(|| {
                    ScrapeError::parse(
                        "JSON",
                        endpoint.url.clone(),
                        format!("expected array under key {key:?}"),
                    )
                })?
            }
            (None, serde_json::Value::Array(items)) => items,
            _ => {
                return Err(ScrapeError::parse(
                    "JSON",
                    endpoint.url.clone(),
                    "expected a record array",
                ))
            }
        };

        for item in records {
            if cancel.is_cancelled() || *remaining == 0 {
                return Ok(());
            }

            let payload = match item {
                serde_json::Value::Object(fields) => RawPayload::Record(RawRecord {
                    kind: endpoint.kind,
                    fields: fields.clone(),
                }),
                // some sources intersperse bare strings; pass them through
                // and let the runner coerce
                serde_json::Value::String(text) => RawPayload::Text(text.clone()),
                other => {
                    tracing::debug!(scraper = %self.id, "skipping non-record element: {other}");
                    continue;
                }
            };

            if tx.send(payload).await.is_err() {
                return Ok(());
            }
            *remaining -= 1;
        }

        Ok(())
    }
}

#[async_trait]
impl Scraper for JsonApiScraper {
    fn id(&self) -> &str {
        &self.id
    }

    async fn extract(
        &self,
        budget: &RunBudget,
        cancel: &CancelToken,
        tx: RecordSender,
    ) -> ScrapeResult<()> {
        let mut remaining = budget.max_records;

        for endpoint in &self.endpoints {
            if cancel.is_cancelled() || remaining == 0 {
                break;
            }
            self.fetch_endpoint(endpoint, cancel, &tx, &mut remaining)
                .await?;
        }

        Ok(())
    }
}
