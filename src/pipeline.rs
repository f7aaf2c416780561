// src/pipeline.rs
//! One scheduled run: ingest, dedup, filter, limit, enrich, reconcile.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::dedup::{deduplicate, normalize};
use crate::enrich::{EnrichedListing, Enricher, SlugAllocator};
use crate::history::{CompanyCount, RunHistory, RunRecord};
use crate::ingest::detect::DetectionReport;
use crate::ingest::types::{RawListing, Source, SourceProvider};
use crate::ingest::{self, IngestPlan};
use crate::sync::{ExpirationPolicy, Reconciler, RemoteStore, WriterLease};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run everything except store calls.
    pub dry_run: bool,
    /// Cap on listings carried past filtering (also bounds keyword search).
    pub limit: Option<usize>,
}

/// Counts emitted at the end of every run, however it ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_ingested: usize,
    pub after_dedup: usize,
    pub after_filter: usize,
    pub created: usize,
    pub updated: usize,
    pub expired: usize,
    pub deleted: usize,
    /// Listings cut by the run limit.
    pub skipped: usize,
    pub errors: usize,
}

/// Relevance gate between dedup and enrichment.
pub trait ListingFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn accept(&self, listing: &RawListing) -> bool;
}

pub struct AcceptAll;

impl ListingFilter for AcceptAll {
    fn name(&self) -> &'static str {
        "accept-all"
    }
    fn accept(&self, _: &RawListing) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub record: RunRecord,
    /// Enriched listings that were pushed (or would have been, in a dry run).
    pub listings: Vec<EnrichedListing>,
    /// A failure outside any per-item boundary ended the run early.
    pub failed: bool,
}

/// Plans in the fixed run order: keyword search, then Greenhouse boards,
/// then Lever boards.
pub fn build_plans(
    adzuna: Option<Arc<dyn SourceProvider>>,
    greenhouse: Arc<dyn SourceProvider>,
    lever: Arc<dyn SourceProvider>,
    detections: &DetectionReport,
) -> Vec<IngestPlan> {
    let mut plans = Vec::new();
    if let Some(adzuna) = adzuna {
        plans.push(IngestPlan::new(
            adzuna,
            crate::ingest::providers::AdzunaProvider::default_endpoints(),
        ));
    }
    let (gh, lv) = detections.endpoints();
    if !gh.is_empty() {
        plans.push(IngestPlan::new(greenhouse, gh));
    }
    if !lv.is_empty() {
        plans.push(IngestPlan::new(lever, lv));
    }
    plans
}

#[derive(Default)]
struct RunStats {
    per_source: BTreeMap<Source, usize>,
    cache: CacheStats,
    generator_calls: usize,
    listings: Vec<EnrichedListing>,
}

pub struct Pipeline {
    plans: Vec<IngestPlan>,
    filter: Arc<dyn ListingFilter>,
    enricher: Arc<dyn Enricher>,
    store: Option<Arc<dyn RemoteStore>>,
    history: Option<RunHistory>,
    policy: ExpirationPolicy,
}

impl Pipeline {
    pub fn new(plans: Vec<IngestPlan>, enricher: Arc<dyn Enricher>) -> Self {
        Self {
            plans,
            filter: Arc::new(AcceptAll),
            enricher,
            store: None,
            history: None,
            policy: ExpirationPolicy::default(),
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn ListingFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// `None` means no store credentials: the push step is skipped.
    pub fn with_store(mut self, store: Option<Arc<dyn RemoteStore>>) -> Self {
        self.store = store;
        self
    }

    pub fn with_history(mut self, history: RunHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run once. Never returns early without a summary; a top-level failure
    /// is logged, counted, recorded, and reported through `failed`.
    pub async fn run(&self, options: RunOptions) -> RunOutcome {
        let started = Instant::now();
        let timestamp = Utc::now();
        if options.dry_run {
            tracing::info!("dry run, no CMS writes");
        }
        if let Some(limit) = options.limit {
            tracing::info!(limit, "limiting listings");
        }

        let mut summary = RunSummary::default();
        let mut stats = RunStats::default();
        let failed = match self.run_inner(options, &mut summary, &mut stats).await {
            Ok(()) => false,
            Err(e) => {
                summary.errors += 1;
                tracing::error!(error = ?e, "pipeline failed");
                true
            }
        };

        log_summary(&summary);

        let record = RunRecord {
            timestamp,
            duration_ms: started.elapsed().as_millis() as u64,
            dry_run: options.dry_run,
            summary,
            unique_companies: stats
                .listings
                .iter()
                .map(|l| normalize(&l.listing.company))
                .collect::<HashSet<_>>()
                .len(),
            listings_by_source: stats
                .per_source
                .iter()
                .map(|(s, n)| (s.as_str().to_string(), *n))
                .collect(),
            top_companies: top_companies(&stats.listings, 10),
            generator_calls: stats.generator_calls,
            cache_hits: stats.cache.hits,
        };
        if let Some(history) = &self.history {
            if let Err(e) = history.append(record.clone()).await {
                tracing::warn!(error = ?e, "could not write run history");
            }
        }

        RunOutcome {
            summary,
            record,
            listings: stats.listings,
            failed,
        }
    }

    async fn run_inner(
        &self,
        options: RunOptions,
        summary: &mut RunSummary,
        stats: &mut RunStats,
    ) -> Result<()> {
        // 1. ingest, keyword search bounded by the limit
        let plans: Vec<IngestPlan> = self
            .plans
            .iter()
            .cloned()
            .map(|p| {
                if p.provider.source() == Source::Adzuna {
                    p.with_limit(options.limit)
                } else {
                    p
                }
            })
            .collect();
        let ingested = ingest::run_once(&plans).await;
        summary.total_ingested = ingested.listings.len();
        summary.errors += ingested.endpoint_errors;
        stats.per_source = ingested.per_source;

        // 2. dedup over the full union
        let deduped = deduplicate(ingested.listings);
        summary.after_dedup = deduped.listings.len();

        // 3. relevance
        let mut kept: Vec<RawListing> = deduped
            .listings
            .into_iter()
            .filter(|l| self.filter.accept(l))
            .collect();
        summary.after_filter = kept.len();
        tracing::info!(
            filter = self.filter.name(),
            passed = kept.len(),
            "listings passed filtering"
        );
        if kept.is_empty() {
            tracing::warn!("no listings passed filtering");
        }

        // 4. limit
        if let Some(limit) = options.limit {
            if kept.len() > limit {
                summary.skipped = kept.len() - limit;
                kept.truncate(limit);
            }
        }

        // 5. enrich, per-listing failures counted
        let total = kept.len();
        for (i, raw) in kept.into_iter().enumerate() {
            let (title, company) = (raw.title.clone(), raw.company.clone());
            tracing::debug!(step = i + 1, total, %title, %company, "enriching");
            match self.enricher.enrich(raw).await {
                Ok(outcome) => {
                    stats.cache.merge(outcome.cache);
                    stats.generator_calls += outcome.generated;
                    stats.listings.push(outcome.listing);
                }
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(error = ?e, %title, %company, "enrichment failed");
                }
            }
        }
        tracing::info!(
            enriched = stats.listings.len(),
            cache_hits = stats.cache.hits,
            cache_misses = stats.cache.misses,
            generator_calls = stats.generator_calls,
            "enrichment complete"
        );

        // 6. push
        if options.dry_run {
            let mut slugs = SlugAllocator::new();
            for l in &stats.listings {
                let raw = &l.listing;
                tracing::info!(
                    title = %raw.title,
                    company = %raw.company,
                    location = %raw.location,
                    source = %raw.source,
                    slug = %slugs.allocate(&l.slug),
                    expires = %self.policy.expiration_for(raw.date_posted, Utc::now()).to_rfc3339(),
                    "would push"
                );
            }
            tracing::info!(count = stats.listings.len(), "dry run complete");
            return Ok(());
        }

        let Some(store) = &self.store else {
            tracing::warn!("CMS credentials not set, skipping push");
            return Ok(());
        };
        let lease = WriterLease::assume_single_writer("pipeline");
        let report = Reconciler::new(Arc::clone(store), lease)
            .with_policy(self.policy)
            .reconcile(&stats.listings)
            .await?;
        summary.created = report.created;
        summary.updated = report.updated;
        summary.expired = report.expired;
        summary.deleted = report.deleted;
        summary.errors += report.errors;
        Ok(())
    }
}

fn top_companies(listings: &[EnrichedListing], n: usize) -> Vec<CompanyCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for l in listings {
        *counts.entry(l.listing.company.as_str()).or_default() += 1;
    }
    let mut out: Vec<CompanyCount> = counts
        .into_iter()
        .map(|(name, count)| CompanyCount {
            name: name.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    out.truncate(n);
    out
}

pub fn log_summary(s: &RunSummary) {
    tracing::info!(
        ingested = s.total_ingested,
        after_dedup = s.after_dedup,
        after_filter = s.after_filter,
        created = s.created,
        updated = s.updated,
        expired = s.expired,
        deleted = s.deleted,
        skipped = s.skipped,
        errors = s.errors,
        "pipeline summary"
    );
}
