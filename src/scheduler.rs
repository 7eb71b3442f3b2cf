//! Trace replay.
//!
//! [`dispatch_trace`] walks a trace and starts one independent task per
//! value, one every `interval`. The interval is measured from one dispatch to
//! the next and does not wait for earlier slots to finish. Once the last slot
//! is dispatched every task is joined, and results come back indexed by
//! slot regardless of completion order.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::metrics::{SLOTS_DISPATCHED_TOTAL, SLOT_FAILURES_TOTAL};
use crate::results::RunResults;
use crate::slot::{SlotError, SlotRunner};
use crate::trace::{InMemoryTrace, TraceError};

/// Outcome of every slot, in trace order.
pub type SlotOutcomes<T> = Vec<Result<T, SlotError>>;

/// Dispatches one `run_slot(slot, value)` task per trace value.
///
/// `run_slot` is called on the dispatching task; the future it returns is
/// spawned. A slot that fails or panics is recorded as `Err` and does not
/// affect the dispatch of later slots.
pub async fn dispatch_trace<I, F, Fut, T>(
    trace: I,
    interval: Duration,
    mut run_slot: F,
) -> SlotOutcomes<T>
where
    I: IntoIterator<Item = u64>,
    F: FnMut(usize, u64) -> Fut,
    Fut: Future<Output = Result<T, SlotError>> + Send + 'static,
    T: Send + 'static,
{
    let start = Instant::now();
    let mut handles = Vec::new();
    let mut slots = trace.into_iter().enumerate().peekable();

    while let Some((slot, concurrency)) = slots.next() {
        debug!(
            slot = slot,
            concurrency = concurrency,
            offset_ms = start.elapsed().as_millis() as u64,
            "Dispatching slot"
        );
        SLOTS_DISPATCHED_TOTAL.inc();
        handles.push(tokio::spawn(run_slot(slot, concurrency)));

        if slots.peek().is_some() {
            time::sleep(interval).await;
        }
    }

    info!(
        slots = handles.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "All slots dispatched, waiting for completion"
    );

    let mut outcomes = Vec::with_capacity(handles.len());
    for (slot, handle) in handles.into_iter().enumerate() {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(SlotError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(SlotError::Cancelled),
        };

        if let Err(ref e) = outcome {
            SLOT_FAILURES_TOTAL.inc();
            warn!(slot = slot, error = %e, "Slot failed");
        }
        outcomes.push(outcome);
    }

    outcomes
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Replays `trace` through `runner`, one slot every `interval`.
pub async fn replay_trace(
    trace: &InMemoryTrace,
    interval: Duration,
    runner: Arc<SlotRunner>,
) -> SlotOutcomes<RunResults> {
    info!(
        timeslots = trace.len(),
        interval_secs = interval.as_secs_f64(),
        "Injecting workload"
    );

    dispatch_trace(trace, interval, |slot, concurrency| {
        let runner = Arc::clone(&runner);
        async move { runner.run(slot, concurrency).await }
    })
    .await
}

/// Loads the trace at `path` and replays it. Fails before anything is
/// dispatched if the file cannot be opened.
pub async fn replay_trace_file<P: AsRef<Path>>(
    path: P,
    interval: Duration,
    runner: Arc<SlotRunner>,
) -> Result<SlotOutcomes<RunResults>, TraceError> {
    let trace = InMemoryTrace::from_file(path)?;
    Ok(replay_trace(&trace, interval, runner).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_results_are_in_slot_order() {
        // Earlier slots take longer, so they finish last.
        let trace = InMemoryTrace::from_values(vec![30, 20, 10, 0]);
        let outcomes = dispatch_trace(&trace, Duration::ZERO, |slot, value| async move {
            time::sleep(Duration::from_millis(value)).await;
            Ok::<_, SlotError>((slot, value))
        })
        .await;

        let values: Vec<(usize, u64)> = outcomes.into_iter().map(|o| o.unwrap()).collect();
        assert_eq!(values, vec![(0, 30), (1, 20), (2, 10), (3, 0)]);
    }

    #[tokio::test]
    async fn test_dispatch_does_not_wait_for_slots() {
        let interval = Duration::from_millis(50);
        let slots = 4;
        let start = Instant::now();
        let dispatched = Arc::new(Mutex::new(Vec::new()));

        let outcomes = dispatch_trace(vec![1; slots], interval, |slot, _| {
            dispatched.lock().unwrap().push((slot, start.elapsed()));
            async move {
                // Each slot lasts longer than the interval.
                time::sleep(Duration::from_millis(200)).await;
                Ok::<_, SlotError>(slot)
            }
        })
        .await;
        let total = start.elapsed();

        assert_eq!(outcomes.len(), slots);
        assert!(total >= interval * (slots as u32 - 1));
        // Sequential execution would need 4 * 200ms.
        assert!(total < Duration::from_millis(700), "took {:?}", total);

        let dispatched = dispatched.lock().unwrap();
        for pair in dispatched.windows(2) {
            assert_eq!(pair[1].0, pair[0].0 + 1);
            assert!(pair[1].1 - pair[0].1 >= interval);
        }
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_later_slots() {
        let outcomes = dispatch_trace(vec![1, 2, 3], Duration::ZERO, |slot, value| async move {
            if slot == 1 {
                Err(SlotError::Cancelled)
            } else {
                Ok(value)
            }
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(*outcomes[0].as_ref().unwrap(), 1);
        assert!(outcomes[1].is_err());
        assert_eq!(*outcomes[2].as_ref().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_panicking_slot_is_recorded() {
        let outcomes = dispatch_trace(vec![1, 2], Duration::ZERO, |slot, value| async move {
            if slot == 0 {
                panic!("boom");
            }
            Ok::<_, SlotError>(value)
        })
        .await;

        match &outcomes[0] {
            Err(SlotError::Panicked(msg)) => assert_eq!(msg, "boom"),
            other => panic!("expected panic outcome, got {:?}", other.as_ref().map(|_| ())),
        }
        assert_eq!(*outcomes[1].as_ref().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_trace() {
        let outcomes =
            dispatch_trace(Vec::<u64>::new(), Duration::from_secs(10), |_, v| async move {
                Ok::<_, SlotError>(v)
            })
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_missing_trace_file_fails_before_dispatch() {
        let runner = Arc::new(SlotRunner::new(
            crate::engine::EngineParams::new("http://127.0.0.1:9/"),
            Arc::new(crate::gauge::ConcurrencyGauge::new("active_slots")),
        ));
        let result =
            replay_trace_file("/nonexistent/iodid/trace.txt", Duration::ZERO, runner).await;
        assert!(result.is_err());
    }
}
