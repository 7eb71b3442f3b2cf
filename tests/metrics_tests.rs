//! Prometheus counters fed by trace replay. The metrics are process-global,
//! so these tests run serially.

use iodid::metrics::{gather_metrics_string, ACTIVE_SLOTS, SLOTS_DISPATCHED_TOTAL, SLOT_FAILURES_TOTAL};
use iodid::scheduler::dispatch_trace;
use iodid::slot::SlotError;
use prometheus::Registry;
use serial_test::serial;
use std::time::Duration;

#[tokio::test]
#[serial]
async fn test_dispatch_counts_slots_and_failures() {
    let dispatched_before = SLOTS_DISPATCHED_TOTAL.get();
    let failures_before = SLOT_FAILURES_TOTAL.get();

    let outcomes = dispatch_trace(vec![1, 0, 2, 0], Duration::ZERO, |_slot, value| async move {
        if value == 0 {
            Err(SlotError::Cancelled)
        } else {
            Ok(value)
        }
    })
    .await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(SLOTS_DISPATCHED_TOTAL.get() - dispatched_before, 4);
    assert_eq!(SLOT_FAILURES_TOTAL.get() - failures_before, 2);
}

#[tokio::test]
#[serial]
async fn test_panicking_slot_is_counted_as_failure() {
    let failures_before = SLOT_FAILURES_TOTAL.get();

    let outcomes = dispatch_trace(vec![1], Duration::ZERO, |_slot, _value| async move {
        if true {
            panic!("slot blew up");
        }
        Ok::<u64, SlotError>(0)
    })
    .await;

    assert!(matches!(&outcomes[0], Err(SlotError::Panicked(msg)) if msg == "slot blew up"));
    assert_eq!(SLOT_FAILURES_TOTAL.get() - failures_before, 1);
}

#[test]
#[serial]
fn test_custom_registry_exposes_slot_metrics() {
    let registry = Registry::new();
    registry.register(Box::new(ACTIVE_SLOTS.clone())).unwrap();
    registry
        .register(Box::new(SLOT_FAILURES_TOTAL.clone()))
        .unwrap();

    ACTIVE_SLOTS.set(3.0);
    let output = gather_metrics_string(&registry);

    assert!(output.contains("iodid_active_slots 3"), "{}", output);
    assert!(output.contains("iodid_slot_failures_total"), "{}", output);

    ACTIVE_SLOTS.set(0.0);
}
