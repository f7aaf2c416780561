// src/ingest/providers/greenhouse.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::ingest::types::{Endpoint, RawListing, Source, SourceProvider};
use crate::ingest::{html_to_text, parse_posted};
use crate::resilience::{ensure_success, send_with_retry, HttpError, RateLimiter, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://boards-api.greenhouse.io/v1/boards";

#[derive(Debug, Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    location: Option<Named>,
    #[serde(default)]
    departments: Vec<Named>,
    #[serde(default)]
    offices: Vec<Named>,
    absolute_url: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

fn join_names(items: &[Named]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    Some(
        items
            .iter()
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    )
}

impl Job {
    fn into_listing(self, company: &str) -> RawListing {
        let location = self
            .location
            .map(|l| l.name)
            .filter(|l| !l.trim().is_empty())
            .or_else(|| join_names(&self.offices))
            .unwrap_or_default();
        // Board content arrives entity-escaped ("&lt;p&gt;"), so decode once
        // to get real markup before stripping it.
        let content = self.content.unwrap_or_default();
        let markup = html_escape::decode_html_entities(&content);
        RawListing {
            title: self.title.trim().to_string(),
            company: company.to_string(),
            location,
            description: html_to_text(&markup),
            source_url: self.absolute_url,
            date_posted: self
                .updated_at
                .as_deref()
                .and_then(parse_posted)
                .unwrap_or_else(Utc::now),
            salary_min: None,
            salary_max: None,
            salary_is_predicted: false,
            contract_type: None,
            contract_time: None,
            category: join_names(&self.departments),
            external_id: None,
            source: Source::Greenhouse,
        }
    }
}

/// Public job-board adapter. Each endpoint is a board token.
pub struct GreenhouseProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl GreenhouseProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::per_second("greenhouse", 10)),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl SourceProvider for GreenhouseProvider {
    fn name(&self) -> &'static str {
        "Greenhouse"
    }

    fn source(&self) -> Source {
        Source::Greenhouse
    }

    async fn probe(&self, token: &str) -> Result<bool> {
        self.limiter.acquire().await;
        let req = self.client.get(format!("{}/{}", self.base_url, token));
        let resp = send_with_retry("greenhouse", req, &self.retry).await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            return Ok(false);
        }
        // still failing after retries: not a "no board" answer
        let body = resp.text().await.unwrap_or_default();
        Err(HttpError::Status { api: "greenhouse", status, body }.into())
    }

    /// The jobs list is not paginated; one request returns the whole board.
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<RawListing>> {
        self.limiter.acquire().await;
        let req = self
            .client
            .get(format!("{}/{}/jobs", self.base_url, endpoint.id))
            .query(&[("content", "true")]);
        let resp = send_with_retry("greenhouse", req, &self.retry).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!(board = %endpoint.id, "greenhouse board not found");
            return Ok(Vec::new());
        }
        let resp = ensure_success("greenhouse", resp)
            .await
            .with_context(|| format!("greenhouse board {}", endpoint.id))?;
        let body: JobsResponse = resp
            .json()
            .await
            .map_err(|source| HttpError::Decode { api: "greenhouse", source })?;

        let company = endpoint.company_name();
        Ok(body
            .jobs
            .into_iter()
            .map(|job| job.into_listing(company))
            .collect())
    }
}
