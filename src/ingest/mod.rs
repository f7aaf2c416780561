// src/ingest/mod.rs
pub mod detect;
pub mod providers;
pub mod registry;
pub mod scheduler;
pub mod types;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;

use crate::ingest::types::{Endpoint, RawListing, Source, SourceProvider};

/// One-time metrics registration (so series show up once a recorder exists).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_listings_total", "Listings returned by adapters.");
        describe_counter!(
            "ingest_duplicate_urls_total",
            "Listings dropped because the same source returned the URL twice."
        );
        describe_counter!(
            "ingest_endpoint_errors_total",
            "Endpoints skipped for the run after a fetch failure."
        );
        describe_counter!(
            "ingest_partial_endpoints_total",
            "Endpoints that failed mid-pagination and kept earlier pages."
        );
        describe_gauge!(
            "ingest_last_run_ts",
            "Unix ts when ingestion last completed."
        );
    });
}

static RE_BR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static RE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</?(p|div|li|h[1-6]|tr)(\s[^>]*)?>").unwrap());
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Convert an HTML description to plain text: block tags and `<br>` become
/// line breaks, other tags are dropped, entities are decoded, and runs of
/// blank lines collapse to one.
pub fn html_to_text(html: &str) -> String {
    let out = RE_BR.replace_all(html, "\n");
    let out = RE_BLOCK.replace_all(&out, "\n");
    let out = RE_TAGS.replace_all(&out, "");
    let out = html_escape::decode_html_entities(&out).replace('\u{a0}', " ");
    let out = RE_BLANK_LINES.replace_all(&out, "\n\n");
    out.trim().to_string()
}

/// Parse an RFC 3339 posting date. Callers choose the fallback.
pub fn parse_posted(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn from_unix_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// An adapter and the endpoints it should fetch this run.
#[derive(Clone)]
pub struct IngestPlan {
    pub provider: Arc<dyn SourceProvider>,
    pub endpoints: Vec<Endpoint>,
    /// Stop fetching further endpoints once this many listings are kept.
    pub limit: Option<usize>,
}

impl IngestPlan {
    pub fn new(provider: Arc<dyn SourceProvider>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            provider,
            endpoints,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub listings: Vec<RawListing>,
    pub per_source: BTreeMap<Source, usize>,
    pub duplicate_urls: usize,
    pub endpoint_errors: usize,
}

/// Run every plan in order and concatenate the results.
///
/// A failing endpoint is logged and skipped; it never aborts the others.
/// The same source returning a listing twice (overlapping search queries)
/// is collapsed here, keyed on [`RawListing::source_key`], so the
/// deduplicator does not mistake it for two openings.
pub async fn run_once(plans: &[IngestPlan]) -> IngestOutcome {
    ensure_metrics_described();

    let mut outcome = IngestOutcome::default();
    let mut seen: HashSet<(Source, String)> = HashSet::new();

    for plan in plans {
        let provider = plan.provider.as_ref();
        let mut kept_for_plan = 0usize;
        for endpoint in &plan.endpoints {
            if plan.limit.is_some_and(|limit| kept_for_plan >= limit) {
                tracing::debug!(provider = provider.name(), "plan limit reached");
                break;
            }
            match provider.fetch(endpoint).await {
                Ok(listings) => {
                    tracing::debug!(
                        provider = provider.name(),
                        endpoint = %endpoint.id,
                        count = listings.len(),
                        "endpoint fetched"
                    );
                    for listing in listings {
                        if plan.limit.is_some_and(|limit| kept_for_plan >= limit) {
                            break;
                        }
                        let (source, key) = listing.source_key();
                        if !seen.insert((source, key.to_string())) {
                            outcome.duplicate_urls += 1;
                            continue;
                        }
                        kept_for_plan += 1;
                        *outcome.per_source.entry(listing.source).or_default() += 1;
                        outcome.listings.push(listing);
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        provider = provider.name(),
                        endpoint = %endpoint.id,
                        "endpoint fetch failed, skipping for this run"
                    );
                    outcome.endpoint_errors += 1;
                    counter!("ingest_endpoint_errors_total").increment(1);
                }
            }
        }
    }

    counter!("ingest_listings_total").increment(outcome.listings.len() as u64);
    counter!("ingest_duplicate_urls_total").increment(outcome.duplicate_urls as u64);
    metrics::gauge!("ingest_last_run_ts").set(Utc::now().timestamp() as f64);

    tracing::info!(
        target: "ingest",
        kept = outcome.listings.len(),
        duplicate_urls = outcome.duplicate_urls,
        endpoint_errors = outcome.endpoint_errors,
        "ingestion complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_turns_blocks_into_lines() {
        let html = "<p>Hello</p><p>World &amp; co</p>";
        assert_eq!(html_to_text(html), "Hello\n\nWorld & co");
    }

    #[test]
    fn html_to_text_handles_br_and_entities() {
        let html = "Line one<br/>Line&nbsp;two<BR>&lt;three&gt; &quot;q&quot; &#39;s&#39;";
        assert_eq!(html_to_text(html), "Line one\nLine two\n<three> \"q\" 's'");
    }

    #[test]
    fn html_to_text_collapses_blank_runs() {
        let html = "<div>a</div>\n\n\n\n<ul><li>b</li></ul>";
        let out = html_to_text(html);
        assert!(!out.contains("\n\n\n"), "{out:?}");
        assert!(out.starts_with('a') && out.ends_with('b'));
    }

    #[test]
    fn html_to_text_keeps_attributes_out() {
        let html = r#"<p class="x">Text <a href="https://x">link</a></p>"#;
        assert_eq!(html_to_text(html), "Text link");
    }

    #[test]
    fn parse_posted_accepts_rfc3339() {
        let dt = parse_posted("2024-03-01T12:00:00Z").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert!(parse_posted("yesterday").is_none());
    }
}
