// src/ingest/detect.rs
//! Board detection: which hosted job board (if any) a registry company uses.
//!
//! Candidate slugs come from the company name and website. Greenhouse is
//! probed first, then Lever. Results, including "none", are cached per
//! normalized company name for [`PROVIDER_DETECTION_TTL_DAYS`].

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, Lookup, TtlCache, TtlPolicy, PROVIDER_DETECTION_TTL_DAYS};
use crate::dedup::normalize;
use crate::ingest::registry::Company;
use crate::ingest::types::{Endpoint, SourceProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoardProvider {
    Greenhouse,
    Lever,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub provider: BoardProvider,
    /// Greenhouse board token or Lever company slug; empty for `None`.
    pub slug: String,
}

impl Detection {
    pub fn none() -> Self {
        Self {
            provider: BoardProvider::None,
            slug: String::new(),
        }
    }
}

static RE_SUFFIXES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(inc|llc|corp|corporation|lp|llp|ltd|limited|group|co|pc|pllc|psc|associates|the)\b",
    )
    .unwrap()
});
static RE_NON_SLUG: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9 ]").unwrap());
static RE_TLD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.(com|org|net|io|co|us|ca|uk)(\..*)?$").unwrap());

fn domain_stem(website: &str) -> Option<String> {
    let w = website.trim().to_lowercase();
    let rest = w.split_once("://").map_or(w.as_str(), |(_, r)| r);
    let host = rest.split(['/', ':', '?', '#']).next().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    let stem = RE_TLD.replace(host, "");
    let stem: String = stem.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    (stem.len() > 2).then_some(stem)
}

/// Slugs to probe, most likely first: the name without corporate suffixes
/// (compact, then hyphenated), then the website's domain stem.
pub fn candidate_slugs(name: &str, website: Option<&str>) -> Vec<String> {
    let lowered = name.to_lowercase();
    let stripped = RE_SUFFIXES.replace_all(&lowered, "");
    let cleaned = RE_NON_SLUG.replace_all(&stripped, "");
    let words: Vec<&str> = cleaned.split_whitespace().collect();

    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !s.is_empty() && !out.contains(&s) {
            out.push(s);
        }
    };
    push(words.concat());
    push(words.join("-"));
    if let Some(stem) = website.and_then(domain_stem) {
        push(stem);
    }
    out
}

#[derive(Debug, Default)]
pub struct DetectionReport {
    pub detections: Vec<(Company, Detection)>,
    pub probed: usize,
    pub cached: usize,
    pub pinned: usize,
    pub stats: CacheStats,
}

impl DetectionReport {
    pub fn count(&self, provider: BoardProvider) -> usize {
        self.detections
            .iter()
            .filter(|(_, d)| d.provider == provider)
            .count()
    }

    /// Greenhouse and Lever endpoints for ingestion, in registry order.
    pub fn endpoints(&self) -> (Vec<Endpoint>, Vec<Endpoint>) {
        let mut greenhouse = Vec::new();
        let mut lever = Vec::new();
        for (company, d) in &self.detections {
            let ep = Endpoint::board(d.slug.clone(), company.name.clone());
            match d.provider {
                BoardProvider::Greenhouse => greenhouse.push(ep),
                BoardProvider::Lever => lever.push(ep),
                BoardProvider::None => {}
            }
        }
        (greenhouse, lever)
    }
}

pub struct BoardDetector {
    greenhouse: Arc<dyn SourceProvider>,
    lever: Arc<dyn SourceProvider>,
    cache: TtlCache<Detection>,
}

impl BoardDetector {
    pub fn new(
        greenhouse: Arc<dyn SourceProvider>,
        lever: Arc<dyn SourceProvider>,
        cache: TtlCache<Detection>,
    ) -> Self {
        Self {
            greenhouse,
            lever,
            cache,
        }
    }

    pub fn cache_policy() -> TtlPolicy {
        TtlPolicy::days(PROVIDER_DETECTION_TTL_DAYS)
    }

    /// Probe each slug on one provider; a probe error counts as "not here".
    async fn first_hit(
        provider: &dyn SourceProvider,
        slugs: &[String],
        errored: &mut bool,
    ) -> Option<String> {
        for slug in slugs {
            match provider.probe(slug).await {
                Ok(true) => return Some(slug.clone()),
                Ok(false) => {}
                Err(e) => {
                    *errored = true;
                    tracing::warn!(error = ?e, provider = provider.name(), slug = %slug, "probe failed");
                }
            }
        }
        None
    }

    /// Probe without consulting the cache. The bool is true when any probe
    /// errored, in which case a `None` result is not trustworthy.
    pub async fn probe_company(&self, company: &Company) -> (Detection, bool) {
        let slugs = candidate_slugs(&company.name, company.website.as_deref());
        let mut errored = false;

        if let Some(slug) = Self::first_hit(self.greenhouse.as_ref(), &slugs, &mut errored).await {
            return (
                Detection {
                    provider: BoardProvider::Greenhouse,
                    slug,
                },
                errored,
            );
        }
        if let Some(slug) = Self::first_hit(self.lever.as_ref(), &slugs, &mut errored).await {
            return (
                Detection {
                    provider: BoardProvider::Lever,
                    slug,
                },
                errored,
            );
        }
        (Detection::none(), errored)
    }

    /// Detect every company. Pinned boards bypass probing; valid cache
    /// entries are reused unless `force`.
    pub async fn detect_all(&self, companies: &[Company], force: bool) -> Result<DetectionReport> {
        let mut report = DetectionReport::default();

        for company in companies {
            if let Some(pinned) = pinned(company) {
                report.pinned += 1;
                report.detections.push((company.clone(), pinned));
                continue;
            }

            let key = normalize(&company.name);
            if !force {
                let lookup = self.cache.lookup(&key).await;
                report.stats.observe(&lookup);
                if let Lookup::Hit(d) = lookup {
                    report.cached += 1;
                    report.detections.push((company.clone(), d));
                    continue;
                }
            }

            let (detection, errored) = self.probe_company(company).await;
            report.probed += 1;
            if detection.provider == BoardProvider::None && errored {
                tracing::warn!(company = %company.name, "detection inconclusive, not cached");
            } else {
                self.cache.put_at(&key, detection.clone(), Utc::now()).await?;
            }
            tracing::info!(
                company = %company.name,
                provider = ?detection.provider,
                slug = %detection.slug,
                "board detected"
            );
            report.detections.push((company.clone(), detection));
        }

        tracing::info!(
            companies = companies.len(),
            probed = report.probed,
            cached = report.cached,
            pinned = report.pinned,
            greenhouse = report.count(BoardProvider::Greenhouse),
            lever = report.count(BoardProvider::Lever),
            "board detection complete"
        );
        Ok(report)
    }
}

fn pinned(company: &Company) -> Option<Detection> {
    if let Some(slug) = &company.greenhouse {
        return Some(Detection {
            provider: BoardProvider::Greenhouse,
            slug: slug.clone(),
        });
    }
    company.lever.as_ref().map(|slug| Detection {
        provider: BoardProvider::Lever,
        slug: slug.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_strip_suffixes_and_use_domain() {
        assert_eq!(
            candidate_slugs("S9 Architecture, LLC", Some("https://www.s9arch.com/about")),
            vec!["s9architecture", "s9-architecture", "s9arch"]
        );
        assert_eq!(candidate_slugs("Gensler", Some("gensler.com")), vec!["gensler"]);
        assert_eq!(
            candidate_slugs("The Beck Group", None),
            vec!["beck"]
        );
    }

    #[test]
    fn short_or_missing_domains_are_skipped() {
        assert_eq!(domain_stem("http://ab.com"), None);
        assert_eq!(domain_stem("hok.co.uk").as_deref(), Some("hok"));
        assert_eq!(domain_stem("https://jobs.example.org:8443/x").as_deref(), Some("jobsexample"));
    }
}
