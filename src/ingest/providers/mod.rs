// src/ingest/providers/mod.rs
pub mod adzuna;
pub mod greenhouse;
pub mod lever;

pub use adzuna::AdzunaProvider;
pub use greenhouse::GreenhouseProvider;
pub use lever::LeverProvider;

/// Shared client for all adapters. Building one can only fail on a broken
/// TLS backend, in which case the default client is used.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("job-board-sync/", env!("CARGO_PKG_VERSION")))
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = ?e, "falling back to default http client");
            reqwest::Client::new()
        })
}
