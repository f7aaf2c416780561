// src/ingest/providers/adzuna.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::types::{Endpoint, RawListing, Source, SourceProvider};
use crate::ingest::{html_to_text, parse_posted};
use crate::resilience::{ensure_success, send_with_retry, HttpError, RateLimiter, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.adzuna.com/v1/api/jobs/us/search";
pub const RESULTS_PER_PAGE: usize = 50;
pub const MAX_PAGES: u32 = 5;

/// Keyword searches run on every ingestion, in this order.
pub const SEARCH_QUERIES: &[&str] = &[
    "project manager architecture",
    "project manager engineering firm",
    "project manager AEC",
    "project director architecture",
    "project engineer design firm",
    "senior project manager construction",
    "project coordinator architecture",
    "resource manager architecture",
    "resource manager engineering",
    "resource planner AEC",
    "capacity planning manager",
    "workforce planning manager engineering",
    "utilization manager",
    "operations manager architecture firm",
    "operations manager engineering",
    "director of operations architecture",
    "studio director architecture",
    "office director engineering",
    "PMO director construction",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<AdResult>,
}

#[derive(Debug, Deserialize)]
struct AdResult {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: String,
    company: Option<Named>,
    location: Option<Named>,
    #[serde(default)]
    description: String,
    redirect_url: String,
    #[serde(default)]
    created: Option<String>,
    salary_min: Option<f64>,
    salary_max: Option<f64>,
    salary_is_predicted: Option<Value>,
    contract_type: Option<String>,
    contract_time: Option<String>,
    category: Option<Category>,
}

#[derive(Debug, Deserialize)]
struct Named {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Category {
    label: String,
}

/// Adzuna returns ids and the predicted flag as strings, occasionally as numbers.
fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl AdResult {
    fn into_listing(self) -> RawListing {
        let salary_is_predicted = self
            .salary_is_predicted
            .as_ref()
            .and_then(value_to_string)
            .is_some_and(|s| s == "1");
        RawListing {
            title: self.title.trim().to_string(),
            company: self
                .company
                .map(|c| c.display_name)
                .unwrap_or_else(|| "Unknown".to_string()),
            location: self.location.map(|l| l.display_name).unwrap_or_default(),
            description: html_to_text(&self.description),
            source_url: self.redirect_url,
            date_posted: self
                .created
                .as_deref()
                .and_then(parse_posted)
                .unwrap_or_else(Utc::now),
            salary_min: self.salary_min,
            salary_max: self.salary_max,
            salary_is_predicted,
            contract_type: self.contract_type,
            contract_time: self.contract_time,
            category: self.category.map(|c| c.label),
            external_id: self.id.as_ref().and_then(value_to_string),
            source: Source::Adzuna,
        }
    }
}

/// Keyword search adapter. Each endpoint is one query string.
pub struct AdzunaProvider {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    app_key: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl AdzunaProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        app_id: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_id: app_id.into(),
            app_key: app_key.into(),
            limiter: Arc::new(RateLimiter::per_second("adzuna", 4)),
            retry: RetryPolicy::default(),
        }
    }

    /// `None` (with a warning) when `ADZUNA_APP_ID` or `ADZUNA_APP_KEY` is unset.
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        let id = std::env::var("ADZUNA_APP_ID").ok().filter(|v| !v.is_empty());
        let key = std::env::var("ADZUNA_APP_KEY").ok().filter(|v| !v.is_empty());
        match (id, key) {
            (Some(id), Some(key)) => Some(Self::new(client, DEFAULT_BASE_URL, id, key)),
            _ => {
                tracing::warn!("ADZUNA_APP_ID or ADZUNA_APP_KEY not set, adzuna disabled");
                None
            }
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// One endpoint per entry in [`SEARCH_QUERIES`].
    pub fn default_endpoints() -> Vec<Endpoint> {
        SEARCH_QUERIES.iter().map(|q| Endpoint::query(*q)).collect()
    }

    async fn fetch_page(
        &self,
        query: &str,
        page: u32,
        per_page: usize,
    ) -> Result<Vec<AdResult>, HttpError> {
        self.limiter.acquire().await;
        let per_page = per_page.to_string();
        let req = self
            .client
            .get(format!("{}/{}", self.base_url, page))
            .query(&[
                ("app_id", self.app_id.as_str()),
                ("app_key", self.app_key.as_str()),
                ("results_per_page", per_page.as_str()),
                ("what", query),
                ("content-type", "application/json"),
            ]);
        let resp = send_with_retry("adzuna", req, &self.retry).await?;
        let resp = ensure_success("adzuna", resp).await?;
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|source| HttpError::Decode { api: "adzuna", source })?;
        Ok(body.results)
    }
}

#[async_trait]
impl SourceProvider for AdzunaProvider {
    fn name(&self) -> &'static str {
        "Adzuna"
    }

    fn source(&self) -> Source {
        Source::Adzuna
    }

    async fn probe(&self, query: &str) -> Result<bool> {
        match self.fetch_page(query, 1, 1).await {
            Ok(results) => Ok(!results.is_empty()),
            Err(e) if e.status().is_some_and(|s| s.is_client_error()) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Pages through one query. A failure on the first page fails the
    /// endpoint; a later failure keeps what was already fetched.
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<RawListing>> {
        let query = endpoint.id.as_str();
        let mut out = Vec::new();

        for page in 1..=MAX_PAGES {
            let results = match self.fetch_page(query, page, RESULTS_PER_PAGE).await {
                Ok(results) => results,
                Err(e) if page == 1 => {
                    return Err(e).with_context(|| format!("adzuna query {query:?}"));
                }
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        provider = "Adzuna",
                        query,
                        page,
                        "page failed, keeping earlier pages"
                    );
                    counter!("ingest_partial_endpoints_total").increment(1);
                    break;
                }
            };

            let n = results.len();
            out.extend(results.into_iter().map(AdResult::into_listing));
            tracing::debug!(query, page, results = n, total = out.len(), "adzuna page");
            if n < RESULTS_PER_PAGE {
                break;
            }
        }

        Ok(out)
    }
}
