// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use job_board_sync::ingest::types::{Endpoint, RawListing, Source, SourceProvider};

pub fn listing(source: Source, company: &str, title: &str, url: &str) -> RawListing {
    RawListing {
        title: title.to_string(),
        company: company.to_string(),
        location: "New York, NY".to_string(),
        description: "Short description.".to_string(),
        source_url: url.to_string(),
        date_posted: Utc::now() - Duration::days(3),
        salary_min: None,
        salary_max: None,
        salary_is_predicted: false,
        contract_type: None,
        contract_time: None,
        category: None,
        external_id: None,
        source,
    }
}

pub fn with_description(mut l: RawListing, chars: usize) -> RawListing {
    l.description = "x".repeat(chars);
    l
}

pub fn posted(mut l: RawListing, at: DateTime<Utc>) -> RawListing {
    l.date_posted = at;
    l
}

/// Scripted provider: per-endpoint results, per-slug probe answers, and a
/// count of every call.
pub struct FakeProvider {
    source: Source,
    results: HashMap<String, Result<Vec<RawListing>, String>>,
    probes: HashMap<String, Result<bool, String>>,
    pub fetches: AtomicUsize,
    pub probed: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            results: HashMap::new(),
            probes: HashMap::new(),
            fetches: AtomicUsize::new(0),
            probed: Mutex::new(Vec::new()),
        }
    }

    pub fn returns(mut self, endpoint: &str, listings: Vec<RawListing>) -> Self {
        self.results.insert(endpoint.to_string(), Ok(listings));
        self
    }

    pub fn fails(mut self, endpoint: &str) -> Self {
        self.results
            .insert(endpoint.to_string(), Err(format!("{endpoint} is down")));
        self
    }

    pub fn board(mut self, slug: &str) -> Self {
        self.probes.insert(slug.to_string(), Ok(true));
        self
    }

    pub fn probe_errors(mut self, slug: &str) -> Self {
        self.probes
            .insert(slug.to_string(), Err(format!("{slug} timed out")));
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> usize {
        self.probed.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "Fake"
    }

    fn source(&self) -> Source {
        self.source
    }

    async fn probe(&self, id: &str) -> Result<bool> {
        self.probed.lock().unwrap().push(id.to_string());
        match self.probes.get(id) {
            Some(Ok(found)) => Ok(*found),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Ok(false),
        }
    }

    async fn fetch(&self, endpoint: &Endpoint) -> Result<Vec<RawListing>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.results.get(&endpoint.id) {
            Some(Ok(listings)) => Ok(listings.clone()),
            Some(Err(e)) => Err(anyhow!(e.clone())),
            None => Ok(Vec::new()),
        }
    }
}
