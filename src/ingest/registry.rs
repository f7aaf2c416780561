// src/ingest/registry.rs
//! Known-company registry: the firms whose own job boards we ingest.
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PATH: &str = "JOB_REGISTRY_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Pinned Greenhouse board token; skips detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greenhouse: Option<String>,
    /// Pinned Lever company slug; skips detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lever: Option<String>,
}

impl Company {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            website: None,
            greenhouse: None,
            lever: None,
        }
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }
}

/// Load the registry from an explicit path. Supports TOML or JSON formats.
pub fn load_registry_from(path: &Path) -> Result<Vec<Company>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading company registry from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_registry(&content, ext.as_str())
        .with_context(|| format!("parsing company registry {}", path.display()))
}

/// Load the registry using env var + fallbacks:
/// 1) $JOB_REGISTRY_PATH
/// 2) config/companies.toml
/// 3) config/companies.json
///
/// No file at all is an empty registry (keyword search still runs).
pub fn load_registry_default() -> Result<Vec<Company>> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_registry_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/companies.toml");
    if toml_p.exists() {
        return load_registry_from(&toml_p);
    }
    let json_p = PathBuf::from("config/companies.json");
    if json_p.exists() {
        return load_registry_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_registry(s: &str, hint_ext: &str) -> Result<Vec<Company>> {
    let try_toml = hint_ext == "toml" || s.contains("[[companies]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported registry format"))
}

fn parse_toml(s: &str) -> Result<Vec<Company>> {
    #[derive(Deserialize)]
    struct TomlRegistry {
        #[serde(default)]
        companies: Vec<Company>,
    }
    let v: TomlRegistry = toml::from_str(s)?;
    Ok(clean_list(v.companies))
}

/// Either a bare array or `{ "companies": [...] }`.
fn parse_json(s: &str) -> Result<Vec<Company>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum JsonRegistry {
        List(Vec<Company>),
        Wrapped { companies: Vec<Company> },
    }
    let v = match serde_json::from_str::<JsonRegistry>(s)? {
        JsonRegistry::List(v) | JsonRegistry::Wrapped { companies: v } => v,
    };
    Ok(clean_list(v))
}

/// Trim names, drop blanks, and keep the first entry per normalized name.
fn clean_list(items: Vec<Company>) -> Vec<Company> {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for mut it in items {
        it.name = it.name.trim().to_string();
        if it.name.is_empty() {
            continue;
        }
        it.website = it.website.map(|w| w.trim().to_string()).filter(|w| !w.is_empty());
        if seen.insert(crate::dedup::normalize(&it.name)) {
            out.push(it);
        }
    }
    out
}
