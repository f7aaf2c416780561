// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use crate::pipeline::{Pipeline, RunOptions};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    pub interval_secs: u64,
    pub options: RunOptions,
}

/// Spawn a loop that runs the pipeline every `interval_secs`, first run
/// immediately. A tick that fires while a run is still going is skipped, so
/// runs never overlap (one writer per store).
pub fn spawn_scheduler(cfg: SchedulerCfg, pipeline: Arc<Pipeline>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let outcome = pipeline.run(cfg.options).await;

            counter!("pipeline_runs_total").increment(1);
            if outcome.failed {
                counter!("pipeline_failed_runs_total").increment(1);
            }
            gauge!("pipeline_last_run_ts").set(outcome.record.timestamp.timestamp() as f64);

            tracing::info!(
                target: "ingest",
                created = outcome.summary.created,
                updated = outcome.summary.updated,
                errors = outcome.summary.errors,
                failed = outcome.failed,
                "scheduled run finished"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::DefaultEnricher;
    use crate::ingest::types::{Endpoint, RawListing, Source, SourceProvider};
    use crate::ingest::IngestPlan;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait::async_trait]
    impl SourceProvider for Counting {
        fn name(&self) -> &'static str {
            "Counting"
        }
        fn source(&self) -> Source {
            Source::Lever
        }
        async fn probe(&self, _: &str) -> anyhow::Result<bool> {
            Ok(true)
        }
        async fn fetch(&self, _: &Endpoint) -> anyhow::Result<Vec<RawListing>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_once_per_tick() {
        let provider = Arc::new(Counting(AtomicUsize::new(0)));
        let plan = IngestPlan::new(provider.clone(), vec![Endpoint::board("acme", "Acme")]);
        let pipeline = Arc::new(Pipeline::new(
            vec![plan],
            Arc::new(DefaultEnricher::disabled()),
        ));
        let handle = spawn_scheduler(
            SchedulerCfg {
                interval_secs: 60,
                options: RunOptions::default(),
            },
            pipeline,
        );

        // immediate first tick, then one per interval
        tokio::time::sleep(Duration::from_secs(150)).await;
        handle.abort();

        assert_eq!(provider.0.load(Ordering::SeqCst), 3);
    }
}
