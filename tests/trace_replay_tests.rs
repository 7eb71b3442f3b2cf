//! Integration tests for trace replay: trace files, slot runs and the
//! active-slot gauge, against a mock server.

use iodid::engine::EngineParams;
use iodid::gauge::{ConcurrencyGauge, GaugeSink};
use iodid::scheduler::{replay_trace, replay_trace_file};
use iodid::slot::{SlotError, SlotRunner};
use iodid::trace::{InMemoryTrace, LazyTrace};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct RecordingSink {
    values: Mutex<Vec<u64>>,
}

impl GaugeSink for RecordingSink {
    fn emit(&self, _name: &str, value: u64) {
        self.values.lock().unwrap().push(value);
    }
}

fn trace_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

async fn ok_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(delay))
        .mount(&server)
        .await;
    server
}

fn runner_for(server: &MockServer, sink: Arc<RecordingSink>) -> Arc<SlotRunner> {
    let gauge = ConcurrencyGauge::new("active_slots").with_sink(sink);
    Arc::new(SlotRunner::new(
        EngineParams::new(server.uri()),
        Arc::new(gauge),
    ))
}

#[test]
fn test_trace_file_skips_comments_and_garbage() {
    let file = trace_file("1\n2\n# a comment\nx\n\n3\n");

    let trace = InMemoryTrace::from_file(file.path()).unwrap();
    assert_eq!(trace.values(), &[1, 2, 3]);
    assert_eq!(trace.len(), 3);
}

#[test]
fn test_trace_file_stops_at_endtrace() {
    let file = trace_file("4\n5\n# ENDTRACE\n6\n");

    let trace = InMemoryTrace::from_file(file.path()).unwrap();
    assert_eq!(trace.values(), &[4, 5]);
}

#[test]
fn test_lazy_trace_can_be_iterated_twice() {
    let file = trace_file("1\n2\n3\n");
    let lazy = LazyTrace::new(file.path());

    let first: Vec<u64> = lazy.iter().unwrap().collect();
    let second: Vec<u64> = lazy.iter().unwrap().collect();
    assert_eq!(first, vec![1, 2, 3]);
    assert_eq!(first, second);
}

#[test]
fn test_missing_trace_file_errors() {
    let lazy = LazyTrace::new("/nonexistent/trace.txt");
    assert!(lazy.iter().is_err());
    assert!(InMemoryTrace::from_file("/nonexistent/trace.txt").is_err());
}

#[tokio::test]
async fn test_replay_runs_one_engine_run_per_slot() {
    let server = ok_server(Duration::ZERO).await;
    let file = trace_file("1\n3\n0\n2\n");
    let sink = Arc::new(RecordingSink::default());
    let runner = runner_for(&server, Arc::clone(&sink));

    let outcomes = replay_trace_file(file.path(), Duration::from_millis(20), Arc::clone(&runner))
        .await
        .unwrap();

    let counts: Vec<u64> = outcomes
        .iter()
        .map(|o| o.as_ref().unwrap().count())
        .collect();
    assert_eq!(counts, vec![1, 3, 0, 2]);
    assert_eq!(server.received_requests().await.unwrap().len(), 6);

    // Every slot entered and left the gauge.
    assert_eq!(runner.gauge().current(), 0);
    let values = sink.values.lock().unwrap();
    assert_eq!(values.len(), 8);
    assert_eq!(values.last(), Some(&0));
}

#[tokio::test]
async fn test_replay_does_not_wait_for_slow_slots() {
    // Each request takes longer than the interval, so slots overlap.
    let server = ok_server(Duration::from_millis(300)).await;
    let trace = InMemoryTrace::from_values(vec![1, 1, 1, 1]);
    let sink = Arc::new(RecordingSink::default());
    let runner = runner_for(&server, Arc::clone(&sink));

    let start = Instant::now();
    let outcomes = replay_trace(&trace, Duration::from_millis(50), runner).await;
    let elapsed = start.elapsed();

    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.is_ok()));

    // Three intervals between four dispatches, plus one slow slot.
    assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1200), "elapsed {:?}", elapsed);

    let peak = sink.values.lock().unwrap().iter().copied().max().unwrap();
    assert!(peak >= 2, "slots never overlapped, peak {}", peak);
}

#[tokio::test]
async fn test_replay_reports_failed_slots_in_place() {
    let trace = InMemoryTrace::from_values(vec![1, 1]);
    let gauge = Arc::new(ConcurrencyGauge::new("active_slots"));
    let broken = Arc::new(SlotRunner::new(
        EngineParams::new("not a url"),
        Arc::clone(&gauge),
    ));

    let outcomes = replay_trace(&trace, Duration::ZERO, broken).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, Err(SlotError::Engine(_)))));
    assert_eq!(gauge.current(), 0);
}

#[tokio::test]
async fn test_replay_missing_file_dispatches_nothing() {
    let server = ok_server(Duration::ZERO).await;
    let sink = Arc::new(RecordingSink::default());
    let runner = runner_for(&server, Arc::clone(&sink));

    let result = replay_trace_file("/nonexistent/trace.txt", Duration::ZERO, runner).await;

    assert!(result.is_err());
    assert!(sink.values.lock().unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_replay_of_unreadable_trace_dispatches_nothing() {
    let server = ok_server(Duration::ZERO).await;
    let sink = Arc::new(RecordingSink::default());
    let runner = runner_for(&server, Arc::clone(&sink));
    let dir = tempfile::tempdir().unwrap();

    let result = replay_trace_file(dir.path(), Duration::ZERO, runner).await;

    assert!(result.is_err(), "a directory was loaded as an empty trace");
    assert!(sink.values.lock().unwrap().is_empty());
    assert!(server.received_requests().await.unwrap().is_empty());
}
