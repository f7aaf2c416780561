// src/ingest/providers/lever.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::ingest::types::{Endpoint, RawListing, Source, SourceProvider};
use crate::ingest::{from_unix_millis, html_to_text};
use crate::resilience::{ensure_success, send_with_retry, HttpError, RateLimiter, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://api.lever.co/v0/postings";
pub const PAGE_SIZE: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Posting {
    text: String,
    description: String,
    description_plain: String,
    additional: String,
    additional_plain: String,
    categories: Categories,
    lists: Vec<Section>,
    hosted_url: String,
    created_at: Option<i64>,
    salary_range: Option<SalaryRange>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Categories {
    team: Option<String>,
    department: Option<String>,
    location: Option<String>,
    commitment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Section {
    text: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct SalaryRange {
    min: Option<f64>,
    max: Option<f64>,
    #[serde(default)]
    interval: String,
}

fn prefer_plain(plain: &str, html: &str) -> String {
    if plain.trim().is_empty() {
        html_to_text(html)
    } else {
        plain.trim().to_string()
    }
}

/// Map a free-text commitment ("Full-time", "Contract") to (type, time).
pub fn map_commitment(commitment: &str) -> (Option<String>, Option<String>) {
    let c = commitment.to_lowercase();
    let contract_type = if c.contains("contract") {
        Some("contract")
    } else if c.contains("permanent") || c.contains("full") {
        Some("permanent")
    } else {
        None
    };
    let contract_time = if c.contains("full") {
        Some("full_time")
    } else if c.contains("part") {
        Some("part_time")
    } else {
        None
    };
    (
        contract_type.map(str::to_string),
        contract_time.map(str::to_string),
    )
}

impl Posting {
    fn description_text(&self) -> String {
        let mut parts = vec![prefer_plain(&self.description_plain, &self.description)];
        for section in &self.lists {
            parts.push(format!("{}:\n{}", section.text, html_to_text(&section.content)));
        }
        parts.push(prefer_plain(&self.additional_plain, &self.additional));
        parts.retain(|p| !p.is_empty());
        parts.join("\n\n")
    }

    fn into_listing(self, company: &str) -> RawListing {
        let description = self.description_text();
        let (contract_type, contract_time) =
            map_commitment(self.categories.commitment.as_deref().unwrap_or_default());
        let (salary_min, salary_max) = match &self.salary_range {
            Some(range) if range.interval.contains("year") => (range.min, range.max),
            _ => (None, None),
        };
        RawListing {
            title: self.text.trim().to_string(),
            company: company.to_string(),
            location: self.categories.location.unwrap_or_default(),
            description,
            source_url: self.hosted_url,
            date_posted: self
                .created_at
                .and_then(from_unix_millis)
                .unwrap_or_else(Utc::now),
            salary_min,
            salary_max,
            salary_is_predicted: false,
            contract_type,
            contract_time,
            category: self.categories.team.or(self.categories.department),
            external_id: None,
            source: Source::Lever,
        }
    }
}

/// Postings adapter. Each endpoint is a company slug.
pub struct LeverProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl LeverProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: Arc::new(RateLimiter::per_second("lever", 10)),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `None` means the company does not exist (404).
    async fn fetch_page(
        &self,
        slug: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Option<Vec<Posting>>, HttpError> {
        self.limiter.acquire().await;
        let (limit, skip) = (limit.to_string(), skip.to_string());
        let req = self
            .client
            .get(format!("{}/{}", self.base_url, slug))
            .query(&[("mode", "json"), ("limit", limit.as_str()), ("skip", skip.as_str())]);
        let resp = send_with_retry("lever", req, &self.retry).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success("lever", resp).await?;
        let postings = resp
            .json::<Vec<Posting>>()
            .await
            .map_err(|source| HttpError::Decode { api: "lever", source })?;
        Ok(Some(postings))
    }
}

#[async_trait]
impl SourceProvider for LeverProvider {
    fn name(&self) -> &'static str {
        "Lever"
    }

    fn source(&self) -> Source {
        Source::Lever
    }

    async fn probe(&self, slug: &str) -> Result<bool> {
        match self.fetch_page(slug, 1, 0).await {
            Ok(Some(postings)) => Ok(!postings.is_empty()),
            Ok(None) => Ok(false),
            Err(e) if e.status().is_some_and(|s| s.is_client_error()) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<RawListing>> {
        let slug = endpoint.id.as_str();
        let mut postings = Vec::new();
        let mut skip = 0;

        loop {
            let page = self
                .fetch_page(slug, PAGE_SIZE, skip)
                .await
                .with_context(|| format!("lever company {slug} (skip {skip})"))?;
            let Some(page) = page else {
                tracing::debug!(company = slug, "lever company not found");
                break;
            };
            let n = page.len();
            postings.extend(page);
            if n < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }

        let company = endpoint.company_name();
        Ok(postings
            .into_iter()
            .map(|p| p.into_listing(company))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commitment_mapping() {
        assert_eq!(
            map_commitment("Full-time"),
            (Some("permanent".into()), Some("full_time".into()))
        );
        assert_eq!(
            map_commitment("Contract, Part-time"),
            (Some("contract".into()), Some("part_time".into()))
        );
        assert_eq!(map_commitment("Intern"), (None, None));
    }

    #[test]
    fn assembles_description_from_sections() {
        let posting: Posting = serde_json::from_value(json!({
            "text": "Studio Director",
            "descriptionPlain": "Run the studio.",
            "lists": [
                { "text": "Requirements", "content": "<li>10 years</li><li>License</li>" }
            ],
            "additional": "<p>Benefits &amp; more</p>",
            "categories": { "location": "Denver, CO", "commitment": "Full-time", "department": "Design" },
            "hostedUrl": "https://jobs.lever.co/acme/abc",
            "createdAt": 1_700_000_000_000i64,
            "salaryRange": { "min": 120000, "max": 150000, "currency": "USD", "interval": "per-year-salary" }
        }))
        .unwrap();

        let listing = posting.into_listing("Acme");
        assert_eq!(
            listing.description,
            "Run the studio.\n\nRequirements:\n10 years\n\nLicense\n\nBenefits & more"
        );
        assert_eq!(listing.location, "Denver, CO");
        assert_eq!(listing.category.as_deref(), Some("Design"));
        assert_eq!(listing.salary_min, Some(120000.0));
        assert_eq!(listing.salary_max, Some(150000.0));
        assert_eq!(listing.date_posted.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn hourly_salary_is_ignored() {
        let posting: Posting = serde_json::from_value(json!({
            "text": "Coordinator",
            "hostedUrl": "https://jobs.lever.co/acme/h",
            "salaryRange": { "min": 30, "max": 40, "interval": "per-hour-wage" }
        }))
        .unwrap();
        let listing = posting.into_listing("Acme");
        assert_eq!((listing.salary_min, listing.salary_max), (None, None));
    }
}
