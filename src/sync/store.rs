// src/sync/store.rs
//! Remote content store model and the write-payload field mapping.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::dedup::fingerprint_of;
use crate::enrich::EnrichedListing;

/// CMS field names. The store is schema-driven, so these are the contract.
pub mod fields {
    pub const NAME: &str = "name";
    pub const SLUG: &str = "slug";
    pub const TITLE: &str = "job-title";
    pub const COMPANY: &str = "company-name";
    pub const LOCATION: &str = "location";
    pub const DESCRIPTION: &str = "description";
    pub const SOURCE_URL: &str = "source-url";
    pub const SOURCE: &str = "source";
    pub const DATE_POSTED: &str = "date-posted";
    pub const SALARY_MIN: &str = "salary-min";
    pub const SALARY_MAX: &str = "salary-max";
    pub const SALARY_ESTIMATED: &str = "salary-estimated";
    pub const CONTRACT_TYPE: &str = "contract-type";
    pub const CONTRACT_TIME: &str = "contract-time";
    pub const CATEGORY: &str = "category";
    pub const COMPANY_SIZE: &str = "company-size";
    pub const COMPANY_HQ: &str = "company-hq";
    pub const ROLE_SUMMARY: &str = "role-summary";
    pub const COMPANY_DESCRIPTION: &str = "company-description";
    pub const EXPIRATION_DATE: &str = "expiration-date";
    pub const PIPELINE_MANAGED: &str = "pipeline-managed";
}

/// One item as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteItem {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub pipeline_managed: bool,
    pub source_url: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub is_draft: bool,
}

fn str_field(data: &Map<String, Value>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl RemoteItem {
    /// Interpret a store item's field data. Unknown fields are ignored;
    /// an unparseable expiration date reads as absent.
    pub fn from_field_data(id: impl Into<String>, is_draft: bool, data: &Map<String, Value>) -> Self {
        let id = id.into();
        Self {
            slug: str_field(data, fields::SLUG).unwrap_or_default(),
            name: str_field(data, fields::NAME).unwrap_or_else(|| id.clone()),
            pipeline_managed: data
                .get(fields::PIPELINE_MANAGED)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            source_url: str_field(data, fields::SOURCE_URL),
            company: str_field(data, fields::COMPANY),
            title: str_field(data, fields::TITLE),
            location: str_field(data, fields::LOCATION),
            expiration_date: str_field(data, fields::EXPIRATION_DATE)
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            is_draft,
            id,
        }
    }

    /// Present only when both company and title are known.
    pub fn fingerprint(&self) -> Option<String> {
        let company = self.company.as_deref()?;
        let title = self.title.as_deref()?;
        Some(fingerprint_of(
            company,
            title,
            self.location.as_deref().unwrap_or_default(),
        ))
    }
}

/// Full field overwrite for one item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPayload {
    pub is_draft: bool,
    pub field_data: Map<String, Value>,
}

impl ItemPayload {
    pub fn for_listing(listing: &EnrichedListing, slug: &str, expiration: DateTime<Utc>) -> Self {
        let raw = &listing.listing;
        let profile = listing.profile.as_ref();
        let mut data = Map::new();
        let mut set = |k: &str, v: Value| {
            data.insert(k.to_string(), v);
        };
        set(fields::NAME, json!(format!("{} at {}", raw.title, raw.company)));
        set(fields::SLUG, json!(slug));
        set(fields::TITLE, json!(raw.title));
        set(fields::COMPANY, json!(raw.company));
        set(fields::LOCATION, json!(raw.location));
        set(fields::DESCRIPTION, json!(raw.description));
        set(fields::SOURCE_URL, json!(raw.source_url));
        set(fields::SOURCE, json!(raw.source.as_str()));
        set(fields::DATE_POSTED, json!(raw.date_posted.to_rfc3339()));
        set(fields::SALARY_MIN, json!(raw.salary_min));
        set(fields::SALARY_MAX, json!(raw.salary_max));
        set(fields::SALARY_ESTIMATED, json!(raw.salary_is_predicted));
        set(
            fields::CONTRACT_TYPE,
            json!(raw.contract_type.clone().unwrap_or_default()),
        );
        set(
            fields::CONTRACT_TIME,
            json!(raw.contract_time.clone().unwrap_or_default()),
        );
        set(fields::CATEGORY, json!(raw.category.clone().unwrap_or_default()));
        set(
            fields::COMPANY_SIZE,
            json!(profile.map(|p| p.employee_count.as_str()).unwrap_or_default()),
        );
        set(
            fields::COMPANY_HQ,
            json!(profile.map(|p| p.hq.as_str()).unwrap_or_default()),
        );
        set(fields::ROLE_SUMMARY, json!(listing.role_summary));
        set(fields::COMPANY_DESCRIPTION, json!(listing.company_description));

        // collaborator fields may add to the payload but never override the
        // identity and lifecycle fields written below
        for (k, v) in &listing.extra {
            data.entry(k.clone()).or_insert_with(|| v.clone());
        }
        data.insert(
            fields::EXPIRATION_DATE.to_string(),
            json!(expiration.to_rfc3339()),
        );
        data.insert(fields::PIPELINE_MANAGED.to_string(), json!(true));

        Self {
            is_draft: false,
            field_data: data,
        }
    }

    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.field_data
            .get(fields::EXPIRATION_DATE)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A paginated, schema-driven remote collection.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn name(&self) -> &'static str;
    /// `limit` items starting at `offset`; a short page means the end.
    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<RemoteItem>>;
    /// Returns the new item id.
    async fn create(&self, payload: &ItemPayload) -> Result<String>;
    async fn update(&self, id: &str, payload: &ItemPayload) -> Result<()>;
    async fn set_draft(&self, id: &str) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn publish(&self) -> Result<()>;
}
