//! Running a single trace slot.
//!
//! A slot with concurrency `N` becomes one engine run of `N` workers sending
//! one request each. The active-slot gauge is held for the whole run and
//! released on every exit path.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{run_load, EngineError, EngineParams};
use crate::gauge::ConcurrencyGauge;
use crate::results::RunResults;

/// Why a slot produced no results.
#[derive(Error, Debug)]
pub enum SlotError {
    #[error("engine run failed: {0}")]
    Engine(#[from] EngineError),

    #[error("slot task panicked: {0}")]
    Panicked(String),

    #[error("slot task was cancelled")]
    Cancelled,
}

/// Turns trace values into engine runs.
pub struct SlotRunner {
    base: EngineParams,
    gauge: Arc<ConcurrencyGauge>,
}

impl SlotRunner {
    /// `base` supplies URL, method, body, client and statsd settings; its
    /// worker and run counts are replaced per slot.
    pub fn new(base: EngineParams, gauge: Arc<ConcurrencyGauge>) -> Self {
        Self { base, gauge }
    }

    pub fn gauge(&self) -> &Arc<ConcurrencyGauge> {
        &self.gauge
    }

    /// Engine parameters for a slot: `concurrency` requests at concurrency
    /// `concurrency`.
    pub fn params_for(&self, concurrency: u64) -> EngineParams {
        let mut params = self.base.clone();
        params.workers = usize::try_from(concurrency).unwrap_or(usize::MAX);
        params.runs_per_worker = Some(1);
        params.duration = None;
        params
    }

    /// Runs one slot.
    pub async fn run(&self, slot: usize, concurrency: u64) -> Result<RunResults, SlotError> {
        let params = self.params_for(concurrency);
        let _active = self.gauge.enter();

        debug!(
            slot = slot,
            concurrency = concurrency,
            active = self.gauge.current(),
            "Slot run starting"
        );

        match run_load(&params).await {
            Ok(results) => {
                debug!(slot = slot, responses = results.count(), "Slot run finished");
                Ok(results)
            }
            Err(e) => {
                warn!(slot = slot, error = %e, "Slot run failed");
                Err(SlotError::Engine(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn runner(url: &str) -> SlotRunner {
        let mut base = EngineParams::new(url);
        base.workers = 99;
        base.runs_per_worker = None;
        base.duration = Some(Duration::from_secs(60));
        SlotRunner::new(base, Arc::new(ConcurrencyGauge::new("active_slots")))
    }

    #[test]
    fn test_params_for_slot() {
        let runner = runner("http://localhost/");
        let params = runner.params_for(12);

        assert_eq!(params.workers, 12);
        assert_eq!(params.runs_per_worker, Some(1));
        assert_eq!(params.duration, None);
        assert_eq!(params.total_requests(), Some(12));
    }

    #[tokio::test]
    async fn test_failed_slot_releases_gauge() {
        let runner = runner("not a url");
        let result = runner.run(0, 3).await;

        assert!(matches!(result, Err(SlotError::Engine(_))));
        assert_eq!(runner.gauge().current(), 0);
    }

    #[tokio::test]
    async fn test_oversized_slot_fails_alone() {
        let runner = runner("http://127.0.0.1:9/");
        let result = runner.run(0, 1_000_000_000_000).await;

        assert!(matches!(
            result,
            Err(SlotError::Engine(EngineError::TooManyWorkers { .. }))
        ));
        assert_eq!(runner.gauge().current(), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_slot_is_empty() {
        let runner = runner("http://127.0.0.1:9/");
        let results = runner.run(0, 0).await.unwrap();

        assert_eq!(results.count(), 0);
        assert_eq!(runner.gauge().current(), 0);
    }
}
