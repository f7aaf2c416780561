// src/enrich.rs
//! Enrichment seam: turns a canonical [`RawListing`] into an
//! [`EnrichedListing`] ready for the CMS.
//!
//! Content generation and company lookups are collaborators behind traits.
//! Both have a disabled implementation that returns nothing, which is what
//! runs when no credential is configured.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::cache::{
    CacheStats, Lookup, TtlCache, TtlPolicy, COMPANY_PROFILE_TTL_DAYS, COMPANY_TEXT_TTL_DAYS,
};
use crate::dedup::{fingerprint, normalize};
use crate::ingest::types::RawListing;

pub const MAX_SLUG_LEN: usize = 80;

// ------------------------------------------------------------
// Slugs
// ------------------------------------------------------------

static RE_SLUG_STRIP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s-]").unwrap());
static RE_SLUG_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static RE_SLUG_HYPHENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").unwrap());

/// `{title}-at-{company}-{location}`, lowercase ASCII, at most
/// [`MAX_SLUG_LEN`] bytes, never ending on a hyphen.
pub fn slugify(title: &str, company: &str, location: &str) -> String {
    let raw = format!("{title} at {company} {location}")
        .to_lowercase()
        .replace('&', "and");
    let s = RE_SLUG_STRIP.replace_all(&raw, "");
    let s = RE_SLUG_SPACE.replace_all(&s, "-");
    let s = RE_SLUG_HYPHENS.replace_all(&s, "-");
    let mut slug = s.trim_matches('-').to_string();

    if slug.len() > MAX_SLUG_LEN {
        slug.truncate(MAX_SLUG_LEN);
        // don't end on a partial word
        if let Some(cut) = slug.rfind('-') {
            if cut * 10 > MAX_SLUG_LEN * 6 {
                slug.truncate(cut);
            }
        }
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    slug
}

/// Hands out unique slugs, suffixing `-2`, `-3`, ... on collision.
#[derive(Debug, Default, Clone)]
pub struct SlugAllocator {
    used: HashSet<String>,
}

impl SlugAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with slugs that already exist remotely.
    pub fn with_existing<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: existing.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allocate(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}-{n}");
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

// ------------------------------------------------------------
// Data
// ------------------------------------------------------------

/// Firmographic data from an external company directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub employee_count: String,
    pub industry: String,
    pub hq: String,
    pub summary: String,
    pub founded: String,
    pub company_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedListing {
    pub listing: RawListing,
    /// Base slug. The final, collision-free slug is assigned at write time.
    pub slug: String,
    pub role_summary: String,
    pub company_description: String,
    pub profile: Option<CompanyProfile>,
    /// Collaborator fields (scores, levels, tags) passed through to the CMS
    /// verbatim, keyed by CMS field name.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl EnrichedListing {
    /// Minimal enrichment: base slug only.
    pub fn bare(listing: RawListing) -> Self {
        let slug = slugify(&listing.title, &listing.company, &listing.location);
        Self {
            listing,
            slug,
            role_summary: String::new(),
            company_description: String::new(),
            profile: None,
            extra: Map::new(),
        }
    }

    pub fn source_url(&self) -> &str {
        &self.listing.source_url
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.listing)
    }
}

// ------------------------------------------------------------
// Collaborators
// ------------------------------------------------------------

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    /// False for the disabled generator; callers skip generation entirely.
    fn is_enabled(&self) -> bool {
        true
    }
    async fn role_summary(
        &self,
        listing: &RawListing,
        profile: Option<&CompanyProfile>,
    ) -> Result<String>;
    async fn company_description(
        &self,
        listing: &RawListing,
        profile: Option<&CompanyProfile>,
    ) -> Result<String>;
}

/// No credential configured: generates nothing.
pub struct DisabledGenerator;

#[async_trait]
impl ContentGenerator for DisabledGenerator {
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn role_summary(&self, _: &RawListing, _: Option<&CompanyProfile>) -> Result<String> {
        Ok(String::new())
    }
    async fn company_description(
        &self,
        _: &RawListing,
        _: Option<&CompanyProfile>,
    ) -> Result<String> {
        Ok(String::new())
    }
}

#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_enabled(&self) -> bool {
        true
    }
    async fn lookup(&self, company: &str) -> Result<Option<CompanyProfile>>;
}

pub struct DisabledDirectory;

#[async_trait]
impl CompanyDirectory for DisabledDirectory {
    fn name(&self) -> &'static str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn lookup(&self, _: &str) -> Result<Option<CompanyProfile>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichOutcome {
    pub listing: EnrichedListing,
    pub cache: CacheStats,
    /// Generator calls actually made (cache misses with generation enabled).
    pub generated: usize,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, raw: RawListing) -> Result<EnrichOutcome>;
}

// ------------------------------------------------------------
// Default enricher
// ------------------------------------------------------------

/// The three caches the default enricher reads through.
#[derive(Clone)]
pub struct EnrichCaches {
    pub profiles: TtlCache<CompanyProfile>,
    pub role_text: TtlCache<String>,
    pub company_text: TtlCache<String>,
}

impl EnrichCaches {
    pub fn profile_policy() -> TtlPolicy {
        TtlPolicy::days(COMPANY_PROFILE_TTL_DAYS)
    }

    pub fn role_text_policy() -> TtlPolicy {
        TtlPolicy::Never
    }

    pub fn company_text_policy() -> TtlPolicy {
        TtlPolicy::days(COMPANY_TEXT_TTL_DAYS)
    }

    pub fn in_memory() -> Self {
        Self {
            profiles: TtlCache::in_memory("company_profiles", Self::profile_policy()),
            role_text: TtlCache::in_memory("role_text", Self::role_text_policy()),
            company_text: TtlCache::in_memory("company_text", Self::company_text_policy()),
        }
    }

    pub async fn open(dir: &Path) -> Self {
        Self {
            profiles: TtlCache::open_file(
                "company_profiles",
                dir,
                "enrichment-cache.json",
                Self::profile_policy(),
            )
            .await,
            role_text: TtlCache::open_file(
                "role_text",
                dir,
                "role-text-cache.json",
                Self::role_text_policy(),
            )
            .await,
            company_text: TtlCache::open_file(
                "company_text",
                dir,
                "company-text-cache.json",
                Self::company_text_policy(),
            )
            .await,
        }
    }
}

/// Content-addressed key for generated role text: the first 500 characters
/// of the description are enough to tell postings apart.
pub fn role_text_key(listing: &RawListing) -> String {
    let head: String = listing.description.chars().take(500).collect();
    let mut h = Sha256::new();
    h.update(listing.company.as_bytes());
    h.update(b"|");
    h.update(listing.title.as_bytes());
    h.update(b"|");
    h.update(head.as_bytes());
    let digest = h.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub struct DefaultEnricher {
    generator: Arc<dyn ContentGenerator>,
    directory: Arc<dyn CompanyDirectory>,
    caches: EnrichCaches,
}

impl DefaultEnricher {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        directory: Arc<dyn CompanyDirectory>,
        caches: EnrichCaches,
    ) -> Self {
        Self {
            generator,
            directory,
            caches,
        }
    }

    /// Slug only; no collaborators, memory caches.
    pub fn disabled() -> Self {
        Self::new(
            Arc::new(DisabledGenerator),
            Arc::new(DisabledDirectory),
            EnrichCaches::in_memory(),
        )
    }

    async fn profile(&self, company: &str, stats: &mut CacheStats) -> Option<CompanyProfile> {
        let key = normalize(company);
        let lookup = self.caches.profiles.lookup(&key).await;
        stats.observe(&lookup);
        if let Lookup::Hit(p) = lookup {
            return Some(p);
        }
        if !self.directory.is_enabled() {
            return None;
        }
        match self.directory.lookup(company).await {
            Ok(Some(p)) => {
                if let Err(e) = self.caches.profiles.put(&key, p.clone()).await {
                    tracing::warn!(error = ?e, company, "profile cache write failed");
                }
                Some(p)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = ?e, directory = self.directory.name(), company, "company lookup failed");
                None
            }
        }
    }

    /// Read-through for one generated text. Generation failures yield empty
    /// text for this run and are not cached.
    async fn cached_text<F>(
        &self,
        cache: &TtlCache<String>,
        key: &str,
        stats: &mut CacheStats,
        generated: &mut usize,
        generate: F,
    ) -> String
    where
        F: std::future::Future<Output = Result<String>> + Send,
    {
        let lookup = cache.lookup(key).await;
        stats.observe(&lookup);
        if let Lookup::Hit(text) = lookup {
            return text;
        }
        if !self.generator.is_enabled() {
            return String::new();
        }
        *generated += 1;
        match generate.await {
            Ok(text) => {
                if !text.is_empty() {
                    if let Err(e) = cache.put(key, text.clone()).await {
                        tracing::warn!(error = ?e, cache = cache.name(), "text cache write failed");
                    }
                }
                text
            }
            Err(e) => {
                tracing::warn!(error = ?e, generator = self.generator.name(), "content generation failed");
                String::new()
            }
        }
    }
}

#[async_trait]
impl Enricher for DefaultEnricher {
    async fn enrich(&self, raw: RawListing) -> Result<EnrichOutcome> {
        let mut stats = CacheStats::default();
        let mut generated = 0usize;

        let profile = self.profile(&raw.company, &mut stats).await;

        let role_key = role_text_key(&raw);
        let role_summary = self
            .cached_text(
                &self.caches.role_text,
                &role_key,
                &mut stats,
                &mut generated,
                self.generator.role_summary(&raw, profile.as_ref()),
            )
            .await;

        let company_key = normalize(&raw.company);
        let company_description = self
            .cached_text(
                &self.caches.company_text,
                &company_key,
                &mut stats,
                &mut generated,
                self.generator.company_description(&raw, profile.as_ref()),
            )
            .await;

        let mut listing = EnrichedListing::bare(raw);
        listing.role_summary = role_summary;
        listing.company_description = company_description;
        listing.profile = profile;

        Ok(EnrichOutcome {
            listing,
            cache: stats,
            generated,
        })
    }
}
