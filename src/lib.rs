// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cache;
pub mod dedup;
pub mod enrich;
pub mod history;
pub mod ingest;
pub mod pipeline;
pub mod resilience;
pub mod sync;

pub use dedup::{deduplicate, fingerprint, normalize, DedupOutcome};
pub use ingest::types::{RawListing, Source};
pub use pipeline::{Pipeline, RunOptions, RunSummary};
