// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable tag of the adapter that produced a listing. The deduplicator
/// groups on it, so values must not change between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Adzuna,
    Greenhouse,
    Lever,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Adzuna => "adzuna",
            Source::Greenhouse => "greenhouse",
            Source::Lever => "lever",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawListing {
    pub title: String,
    pub company: String,
    pub location: String,
    /// Plain text; adapters strip markup before returning.
    pub description: String,
    pub source_url: String,
    pub date_posted: DateTime<Utc>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_is_predicted: bool,
    pub contract_type: Option<String>,
    pub contract_time: Option<String>,
    pub category: Option<String>,
    /// Source-native id when the source exposes one (Adzuna ad id).
    #[serde(default)]
    pub external_id: Option<String>,
    pub source: Source,
}

impl RawListing {
    /// Identity within one source for a single run.
    pub fn source_key(&self) -> (Source, &str) {
        (
            self.source,
            self.external_id.as_deref().unwrap_or(&self.source_url),
        )
    }
}

/// One thing an adapter can be asked to fetch: a search query for the
/// keyword board, or an employer board slug plus display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub company: Option<String>,
}

impl Endpoint {
    pub fn query(q: impl Into<String>) -> Self {
        Self {
            id: q.into(),
            company: None,
        }
    }

    pub fn board(slug: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            id: slug.into(),
            company: Some(company.into()),
        }
    }

    /// Company display name, falling back to the slug.
    pub fn company_name(&self) -> &str {
        self.company.as_deref().unwrap_or(&self.id)
    }
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn source(&self) -> Source;
    /// Cheap existence check for a board slug (or query), used by detection.
    async fn probe(&self, id: &str) -> Result<bool>;
    /// All listings for one endpoint, paginated to exhaustion.
    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<RawListing>>;
}
