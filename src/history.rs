//! history.rs: persisted log of pipeline runs, pruned to a rolling window.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::store::write_atomic;
use crate::pipeline::RunSummary;

pub const MAX_AGE_MONTHS: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    pub summary: RunSummary,
    pub unique_companies: usize,
    #[serde(default)]
    pub listings_by_source: BTreeMap<String, usize>,
    #[serde(default)]
    pub top_companies: Vec<CompanyCount>,
    #[serde(default)]
    pub generator_calls: usize,
    #[serde(default)]
    pub cache_hits: usize,
}

impl RunRecord {
    /// A run that failed before ingestion started.
    pub fn failed(timestamp: DateTime<Utc>, duration_ms: u64, dry_run: bool) -> Self {
        Self {
            timestamp,
            duration_ms,
            dry_run,
            summary: RunSummary {
                errors: 1,
                ..Default::default()
            },
            unique_companies: 0,
            listings_by_source: BTreeMap::new(),
            top_companies: Vec::new(),
            generator_calls: 0,
            cache_hits: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("run-history.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable history is empty history.
    pub async fn load(&self) -> Vec<RunRecord> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "run history unreadable");
                return Vec::new();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "run history corrupt, starting fresh");
            Vec::new()
        })
    }

    pub async fn append(&self, record: RunRecord) -> Result<()> {
        self.append_at(record, Utc::now()).await
    }

    /// Append and drop records older than [`MAX_AGE_MONTHS`] before `now`.
    pub async fn append_at(&self, record: RunRecord, now: DateTime<Utc>) -> Result<()> {
        let mut history = self.load().await;
        history.push(record);
        let cutoff = prune_cutoff(now);
        history.retain(|r| r.timestamp >= cutoff);

        let bytes = serde_json::to_vec_pretty(&history).context("serializing run history")?;
        write_atomic(&self.path, &bytes)
            .await
            .with_context(|| format!("writing run history {}", self.path.display()))
    }
}

fn prune_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(MAX_AGE_MONTHS))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportingStats {
    pub total_runs: usize,
    pub created_30d: usize,
    pub created_60d: usize,
    pub created_90d: usize,
    /// Week start (Sunday, `YYYY-MM-DD`) -> items created that week.
    pub weekly_created: Vec<(String, usize)>,
    pub top_companies: Vec<CompanyCount>,
}

/// Aggregate created counts and company frequencies over the history.
pub fn reporting_stats(history: &[RunRecord], now: DateTime<Utc>) -> ReportingStats {
    let mut stats = ReportingStats {
        total_runs: history.len(),
        ..Default::default()
    };
    let mut weekly: BTreeMap<String, usize> = BTreeMap::new();
    let mut companies: HashMap<&str, usize> = HashMap::new();

    for run in history {
        let created = run.summary.created;
        let age = now - run.timestamp;
        if age <= Duration::days(30) {
            stats.created_30d += created;
        }
        if age <= Duration::days(60) {
            stats.created_60d += created;
        }
        if age <= Duration::days(90) {
            stats.created_90d += created;
        }

        let back = i64::from(run.timestamp.weekday().num_days_from_sunday());
        let week = (run.timestamp - Duration::days(back)).format("%Y-%m-%d").to_string();
        *weekly.entry(week).or_default() += created;

        for c in &run.top_companies {
            *companies.entry(c.name.as_str()).or_default() += c.count;
        }
    }

    stats.weekly_created = weekly.into_iter().collect();
    let mut top: Vec<CompanyCount> = companies
        .into_iter()
        .map(|(name, count)| CompanyCount {
            name: name.to_string(),
            count,
        })
        .collect();
    top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    top.truncate(10);
    stats.top_companies = top;
    stats
}
