// src/sync/mod.rs
//! Reconciliation of the canonical listing set against the remote store.
//!
//! One pass runs strictly in order: snapshot, write (update or create per
//! listing), expire sweep, hard-delete sweep, publish. Writes are never
//! issued concurrently.

pub mod memory;
pub mod policy;
pub mod store;
pub mod webflow;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::enrich::{EnrichedListing, SlugAllocator};
pub use memory::InMemoryCms;
pub use policy::ExpirationPolicy;
pub use store::{ItemPayload, RemoteItem, RemoteStore};
pub use webflow::WebflowStore;

pub const PAGE_SIZE: usize = 100;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_created_total", "Items created in the remote store.");
        describe_counter!("sync_updated_total", "Items overwritten in the remote store.");
        describe_counter!("sync_expired_total", "Managed items moved to draft.");
        describe_counter!("sync_deleted_total", "Managed items permanently deleted.");
        describe_counter!("sync_errors_total", "Per-item write or sweep failures.");
    });
}

/// Proof that the caller is the only writer for this store during the run.
///
/// Nothing enforces this today; overlapping runs against one store may
/// create duplicates. A conditional-write backend would hand out real
/// leases here.
#[derive(Debug, Clone)]
pub struct WriterLease {
    holder: String,
}

impl WriterLease {
    pub fn assume_single_writer(holder: impl Into<String>) -> Self {
        Self {
            holder: holder.into(),
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }
}

/// Read every item, `page_size` at a time, until a short page.
pub async fn list_all(store: &dyn RemoteStore, page_size: usize) -> Result<Vec<RemoteItem>> {
    let page_size = page_size.max(1);
    let mut items = Vec::new();
    let mut offset = 0;
    loop {
        let page = store
            .list_page(offset, page_size)
            .await
            .with_context(|| format!("listing {} items at offset {offset}", store.name()))?;
        let n = page.len();
        items.extend(page);
        if n < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(items)
}

/// Indexed copy of the remote collection taken before any write.
///
/// Only pipeline-managed items are indexed for matching; hand-made items
/// contribute their slugs and nothing else.
#[derive(Debug, Default)]
pub struct Snapshot {
    items: Vec<RemoteItem>,
    by_source_url: HashMap<String, usize>,
    by_fingerprint: HashMap<String, Vec<usize>>,
}

impl Snapshot {
    pub fn from_items(items: Vec<RemoteItem>) -> Self {
        let mut by_source_url = HashMap::new();
        let mut by_fingerprint: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, item) in items.iter().enumerate().filter(|(_, item)| item.pipeline_managed) {
            if let Some(url) = &item.source_url {
                by_source_url.insert(url.clone(), i);
            }
            if let Some(fp) = item.fingerprint() {
                by_fingerprint.entry(fp).or_default().push(i);
            }
        }
        Self {
            items,
            by_source_url,
            by_fingerprint,
        }
    }

    pub async fn load(store: &dyn RemoteStore, page_size: usize) -> Result<Self> {
        Ok(Self::from_items(list_all(store, page_size).await?))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[RemoteItem] {
        &self.items
    }

    pub fn slugs(&self) -> impl Iterator<Item = &str> {
        self.items
            .iter()
            .map(|i| i.slug.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    SourceUrl,
    Fingerprint,
}

/// Decides, for each incoming listing, which snapshot item (if any) it
/// overwrites. Each remote item is claimed at most once per run.
struct Matcher<'a> {
    snapshot: &'a Snapshot,
    incoming_urls: HashSet<&'a str>,
    claimed: HashSet<usize>,
}

impl<'a> Matcher<'a> {
    fn new(snapshot: &'a Snapshot, listings: &'a [EnrichedListing]) -> Self {
        Self {
            snapshot,
            incoming_urls: listings.iter().map(|l| l.source_url()).collect(),
            claimed: HashSet::new(),
        }
    }

    /// Source URL first; otherwise a fingerprint match whose item is not
    /// already claimed and is not going to be matched by its own URL.
    /// Several listings sharing a fingerprint are separate requisitions, so
    /// only one of them may take over an item; the rest are created.
    fn find(&mut self, listing: &EnrichedListing) -> Option<(usize, MatchKind)> {
        if let Some(&i) = self.snapshot.by_source_url.get(listing.source_url()) {
            self.claimed.insert(i);
            return Some((i, MatchKind::SourceUrl));
        }
        let candidates = self.snapshot.by_fingerprint.get(&listing.fingerprint())?;
        let found = candidates.iter().copied().find(|i| {
            let item = &self.snapshot.items[*i];
            !self.claimed.contains(i)
                && item
                    .source_url
                    .as_deref()
                    .map_or(true, |u| !self.incoming_urls.contains(u))
        })?;
        self.claimed.insert(found);
        Some((found, MatchKind::Fingerprint))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub expired: usize,
    pub deleted: usize,
    pub errors: usize,
    pub fingerprint_matches: usize,
    pub published: bool,
}

pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    policy: ExpirationPolicy,
    page_size: usize,
    lease: WriterLease,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, lease: WriterLease) -> Self {
        Self {
            store,
            policy: ExpirationPolicy::default(),
            page_size: PAGE_SIZE,
            lease,
        }
    }

    pub fn with_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    pub async fn reconcile(&self, listings: &[EnrichedListing]) -> Result<SyncReport> {
        self.reconcile_at(listings, Utc::now()).await
    }

    /// Full pass with an explicit clock. Only a failed snapshot is fatal.
    pub async fn reconcile_at(
        &self,
        listings: &[EnrichedListing],
        now: DateTime<Utc>,
    ) -> Result<SyncReport> {
        ensure_metrics_described();
        tracing::info!(
            store = self.store.name(),
            writer = self.lease.holder(),
            listings = listings.len(),
            "reconciliation started"
        );

        let snapshot = Snapshot::load(self.store.as_ref(), self.page_size)
            .await
            .context("taking remote snapshot")?;
        tracing::info!(items = snapshot.len(), "remote snapshot loaded");

        let mut report = SyncReport::default();
        self.write_all(&snapshot, listings, now, &mut report).await;
        self.expire_sweep(now, &mut report).await;
        self.delete_sweep(now, &mut report).await;
        report.published = self.publish().await;

        counter!("sync_created_total").increment(report.created as u64);
        counter!("sync_updated_total").increment(report.updated as u64);
        counter!("sync_expired_total").increment(report.expired as u64);
        counter!("sync_deleted_total").increment(report.deleted as u64);
        counter!("sync_errors_total").increment(report.errors as u64);

        tracing::info!(
            created = report.created,
            updated = report.updated,
            expired = report.expired,
            deleted = report.deleted,
            errors = report.errors,
            fingerprint_matches = report.fingerprint_matches,
            "reconciliation complete"
        );
        Ok(report)
    }

    async fn write_all(
        &self,
        snapshot: &Snapshot,
        listings: &[EnrichedListing],
        now: DateTime<Utc>,
        report: &mut SyncReport,
    ) {
        let mut matcher = Matcher::new(snapshot, listings);
        let mut slugs = SlugAllocator::with_existing(snapshot.slugs());

        for listing in listings {
            let raw = &listing.listing;
            let expiration = self.policy.expiration_for(raw.date_posted, now);

            let result = match matcher.find(listing) {
                Some((i, kind)) => {
                    let target = &snapshot.items[i];
                    let slug = if target.slug.is_empty() {
                        slugs.allocate(&listing.slug)
                    } else {
                        target.slug.clone()
                    };
                    let payload = ItemPayload::for_listing(listing, &slug, expiration);
                    if kind == MatchKind::Fingerprint {
                        report.fingerprint_matches += 1;
                        tracing::info!(
                            title = %raw.title,
                            company = %raw.company,
                            item = %target.id,
                            "fingerprint match, updating existing item"
                        );
                    }
                    self.store.update(&target.id, &payload).await.map(|()| {
                        report.updated += 1;
                        tracing::debug!(item = %target.id, slug = %slug, "updated");
                    })
                }
                None => {
                    let slug = slugs.allocate(&listing.slug);
                    let payload = ItemPayload::for_listing(listing, &slug, expiration);
                    self.store.create(&payload).await.map(|id| {
                        report.created += 1;
                        tracing::debug!(item = %id, slug = %slug, "created");
                    })
                }
            };

            if let Err(e) = result {
                report.errors += 1;
                tracing::error!(
                    error = ?e,
                    title = %raw.title,
                    company = %raw.company,
                    source_url = %raw.source_url,
                    "failed to push listing"
                );
            }
        }
    }

    /// Draft every managed, live item whose expiration has passed.
    async fn expire_sweep(&self, now: DateTime<Utc>, report: &mut SyncReport) {
        let items = match list_all(self.store.as_ref(), self.page_size).await {
            Ok(items) => items,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = ?e, "expire sweep could not list items");
                return;
            }
        };

        for item in items {
            if !item.pipeline_managed || item.is_draft {
                continue;
            }
            let Some(exp) = item.expiration_date else {
                continue;
            };
            if !self.policy.is_expired(exp, now) {
                continue;
            }
            match self.store.set_draft(&item.id).await {
                Ok(()) => {
                    report.expired += 1;
                    tracing::info!(item = %item.id, name = %item.name, "expired");
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(error = ?e, item = %item.id, "failed to expire item");
                }
            }
        }
    }

    /// Collect every deletable item over the full listing, then delete one
    /// at a time, so deletions never shift the pages being read.
    async fn delete_sweep(&self, now: DateTime<Utc>, report: &mut SyncReport) {
        let doomed: Vec<RemoteItem> = match list_all(self.store.as_ref(), self.page_size).await {
            Ok(items) => items
                .into_iter()
                .filter(|i| i.pipeline_managed)
                .filter(|i| {
                    i.expiration_date
                        .is_some_and(|exp| self.policy.is_deletable(exp, now))
                })
                .collect(),
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = ?e, "delete sweep could not list items");
                return;
            }
        };

        for item in doomed {
            match self.store.delete(&item.id).await {
                Ok(()) => {
                    report.deleted += 1;
                    tracing::info!(item = %item.id, name = %item.name, "deleted");
                }
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(error = ?e, item = %item.id, "failed to delete item");
                }
            }
        }
        if report.deleted > 0 {
            tracing::info!(deleted = report.deleted, "hard-deleted managed items past grace period");
        }
    }

    /// Publish is best-effort; a failure leaves writes staged.
    async fn publish(&self) -> bool {
        match self.store.publish().await {
            Ok(()) => {
                tracing::info!(store = self.store.name(), "site published");
                true
            }
            Err(e) => {
                tracing::warn!(error = ?e, "publish failed, changes remain staged");
                false
            }
        }
    }
}
