// src/dedup.rs
//! Cross-source deduplication.
//!
//! Listings are grouped by fingerprint (`company|title|location`, each
//! normalized). A group where one source contributes several listings is
//! taken as several real openings; otherwise the group is one opening seen
//! through several sources and the fullest description wins.

use std::collections::{BTreeMap, HashMap};

use metrics::counter;

use crate::ingest::types::{RawListing, Source};

/// Lowercase, keep only `a-z`, `0-9` and spaces, collapse whitespace, trim.
pub fn normalize(s: &str) -> String {
    let lowered = s.to_lowercase();
    let kept: String = lowered
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == ' ')
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn fingerprint_of(company: &str, title: &str, location: &str) -> String {
    format!(
        "{}|{}|{}",
        normalize(company),
        normalize(title),
        normalize(location)
    )
}

pub fn fingerprint(listing: &RawListing) -> String {
    fingerprint_of(&listing.company, &listing.title, &listing.location)
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub listings: Vec<RawListing>,
    pub removed: usize,
    /// Groups kept whole because one source listed the opening more than once.
    pub multi_requisition_groups: usize,
}

/// Collapse fingerprint groups. Output follows the order in which each group
/// first appeared; within a kept group the input order is preserved.
pub fn deduplicate(listings: Vec<RawListing>) -> DedupOutcome {
    let before = listings.len();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<RawListing>> = HashMap::new();
    for listing in listings {
        let key = fingerprint(&listing);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(listing);
    }

    let mut outcome = DedupOutcome::default();
    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };
        if group.len() == 1 {
            outcome.listings.extend(group);
            continue;
        }

        let mut per_source: BTreeMap<Source, usize> = BTreeMap::new();
        for l in &group {
            *per_source.entry(l.source).or_default() += 1;
        }

        if per_source.values().any(|&n| n > 1) {
            outcome.multi_requisition_groups += 1;
            tracing::debug!(fingerprint = %key, "multi-requisition group kept");
            outcome.listings.extend(
                group
                    .into_iter()
                    .filter(|l| per_source.get(&l.source).is_some_and(|&n| n > 1)),
            );
        } else if let Some(best) = longest_description(group) {
            outcome.listings.push(best);
        }
    }

    outcome.removed = before - outcome.listings.len();
    if outcome.removed > 0 {
        counter!("dedup_removed_total").increment(outcome.removed as u64);
        tracing::info!(
            before,
            after = outcome.listings.len(),
            removed = outcome.removed,
            "cross-source duplicates removed"
        );
    }
    outcome
}

/// First listing with the strictly longest description.
fn longest_description(group: Vec<RawListing>) -> Option<RawListing> {
    let mut best: Option<(usize, RawListing)> = None;
    for l in group {
        let len = l.description.chars().count();
        match &best {
            Some((best_len, _)) if len <= *best_len => {}
            _ => best = Some((len, l)),
        }
    }
    best.map(|(_, l)| l)
}
