//! Results of one engine run.
//!
//! A [`RunResults`] is produced per fixed-count run and per trace slot. It
//! keeps every observed latency grouped by HTTP status, plus error tables,
//! and is never modified once the run that produced it has returned.

use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::warn;

use crate::errors::RequestFailure;

/// Latencies are kept in seconds; histograms use microseconds, 1us..60s.
const HISTOGRAM_MAX_US: u64 = 60_000_000;

/// Per-run latency samples and error tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResults {
    /// HTTP status -> observed latencies in seconds, in completion order.
    pub status_latencies: BTreeMap<u16, Vec<f64>>,

    /// Error key (status code or error category label) -> occurrences.
    pub errors: BTreeMap<String, u64>,

    /// Error key -> description of the first occurrence.
    pub errors_desc: BTreeMap<String, String>,

    /// Transport failures (no HTTP status received).
    pub transport_failures: u64,

    /// Wall-clock time the run took.
    pub elapsed: Duration,
}

/// Headline numbers of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    /// Responses received.
    pub count: u64,

    /// Average latency in seconds.
    pub avg: f64,

    /// Responses per minute.
    pub rpm: f64,

    /// Failed requests (error statuses plus transport failures).
    pub errors: u64,

    pub elapsed_secs: f64,
}

/// Per-status entry of the JSON report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusStats {
    pub count: u64,
    pub avg: f64,
}

/// Error entry of the JSON report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub key: String,
    pub description: String,
    pub occurrences: u64,
}

/// Full JSON report for a single run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub status_codes: BTreeMap<u16, StatusStats>,
    pub error_details: Vec<ErrorEntry>,
}

impl RunResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a response and its latency.
    pub fn record_response(&mut self, status: u16, latency: Duration) {
        self.status_latencies
            .entry(status)
            .or_default()
            .push(latency.as_secs_f64());

        if let Some(failure) = RequestFailure::from_status(status) {
            self.record_error(&failure);
        }
    }

    /// Records a request that got no response at all.
    pub fn record_transport_failure(&mut self, failure: &RequestFailure) {
        self.transport_failures += 1;
        self.record_error(failure);
    }

    fn record_error(&mut self, failure: &RequestFailure) {
        let key = match failure.status {
            Some(status) => status.to_string(),
            None => failure.category.label().to_string(),
        };
        *self.errors.entry(key.clone()).or_insert(0) += 1;
        self.errors_desc
            .entry(key)
            .or_insert_with(|| failure.description.clone());
    }

    /// Folds another worker's results into this one. `elapsed` is left alone.
    pub fn merge(&mut self, other: RunResults) {
        for (status, mut samples) in other.status_latencies {
            self.status_latencies
                .entry(status)
                .or_default()
                .append(&mut samples);
        }
        for (key, count) in other.errors {
            *self.errors.entry(key).or_insert(0) += count;
        }
        for (key, desc) in other.errors_desc {
            self.errors_desc.entry(key).or_insert(desc);
        }
        self.transport_failures += other.transport_failures;
    }

    /// Number of responses received.
    pub fn count(&self) -> u64 {
        self.status_latencies.values().map(|v| v.len() as u64).sum()
    }

    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }

    fn all_latencies(&self) -> impl Iterator<Item = f64> + '_ {
        self.status_latencies.values().flatten().copied()
    }

    pub fn summary(&self) -> RunSummary {
        let count = self.count();
        let avg = if count > 0 {
            self.all_latencies().sum::<f64>() / count as f64
        } else {
            0.0
        };
        let minutes = self.elapsed.as_secs_f64() / 60.0;
        let rpm = if minutes > 0.0 {
            count as f64 / minutes
        } else {
            0.0
        };

        RunSummary {
            count,
            avg,
            rpm,
            errors: self.error_count(),
            elapsed_secs: self.elapsed.as_secs_f64(),
        }
    }

    pub fn report(&self) -> RunReport {
        let status_codes = self
            .status_latencies
            .iter()
            .map(|(status, samples)| {
                let count = samples.len() as u64;
                let avg = if count > 0 {
                    samples.iter().sum::<f64>() / count as f64
                } else {
                    0.0
                };
                (*status, StatusStats { count, avg })
            })
            .collect();

        let error_details = self
            .errors
            .iter()
            .map(|(key, occurrences)| ErrorEntry {
                key: key.clone(),
                description: self.errors_desc.get(key).cloned().unwrap_or_default(),
                occurrences: *occurrences,
            })
            .collect();

        RunReport {
            summary: self.summary(),
            status_codes,
            error_details,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.report())
    }

    /// Latency histogram over all responses, in microseconds.
    pub fn latency_histogram(&self) -> Option<Histogram<u64>> {
        let mut hist = match Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_US, 3) {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "Failed to create latency histogram");
                return None;
            }
        };

        for latency in self.all_latencies() {
            let us = ((latency * 1_000_000.0) as u64).clamp(1, HISTOGRAM_MAX_US);
            if let Err(e) = hist.record(us) {
                warn!(latency_us = us, error = %e, "Failed to record latency in histogram");
            }
        }

        if hist.is_empty() {
            None
        } else {
            Some(hist)
        }
    }

    /// Console report for a fixed-count or duration run.
    pub fn render_stats(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();

        let _ = writeln!(out, "Summary:");
        let _ = writeln!(out, "  Total:        {:.4} secs", summary.elapsed_secs);
        let _ = writeln!(out, "  Requests:     {}", summary.count);
        if summary.elapsed_secs > 0.0 {
            let _ = writeln!(
                out,
                "  RPS:          {:.2}",
                summary.count as f64 / summary.elapsed_secs
            );
        }
        let _ = writeln!(out, "  Average:      {:.4} secs", summary.avg);

        if let Some(hist) = self.latency_histogram() {
            let ms = |us: u64| us as f64 / 1_000.0;
            let _ = writeln!(out, "  Fastest:      {:.2} ms", ms(hist.min()));
            let _ = writeln!(out, "  Slowest:      {:.2} ms", ms(hist.max()));
            let _ = writeln!(out, "  p50:          {:.2} ms", ms(hist.value_at_quantile(0.50)));
            let _ = writeln!(out, "  p90:          {:.2} ms", ms(hist.value_at_quantile(0.90)));
            let _ = writeln!(out, "  p99:          {:.2} ms", ms(hist.value_at_quantile(0.99)));
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Status code distribution:");
        for (status, samples) in &self.status_latencies {
            let _ = writeln!(out, "  [{}] {} responses", status, samples.len());
        }
        if self.transport_failures > 0 {
            let _ = writeln!(out, "  [none] {} transport failures", self.transport_failures);
        }

        out
    }

    /// Error table, `<description> (<n> occurrences)` per line.
    pub fn render_errors(&self) -> String {
        let mut out = String::new();
        for (key, count) in &self.errors {
            let desc = self.errors_desc.get(key).map(String::as_str).unwrap_or(key);
            let _ = writeln!(out, "{} ({} occurences)", desc, count);
        }
        out
    }

    /// One-line report for a trace slot.
    pub fn render_slot(&self, slot: usize) -> String {
        let summary = self.summary();
        format!(
            "t={}, wl={}, rt={}, rpm={},\n       counters={}",
            slot,
            summary.count,
            summary.avg,
            summary.rpm,
            show_counters(&self.status_latencies, DEFAULT_MAX_COUNTERS)
        )
    }
}

/// JSON entry for one trace slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotReport {
    pub slot: usize,
    #[serde(flatten)]
    pub summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SlotReport {
    pub fn new<E: std::fmt::Display>(slot: usize, outcome: &Result<RunResults, E>) -> Self {
        match outcome {
            Ok(results) => Self {
                slot,
                summary: Some(results.summary()),
                error: None,
            },
            Err(e) => Self {
                slot,
                summary: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub const DEFAULT_MAX_COUNTERS: usize = 8;

/// Renders `{status: [latencies], ...}`; sequences of `max_counters` or more
/// samples show only the first and last `max_counters / 2`.
pub fn show_counters(counters: &BTreeMap<u16, Vec<f64>>, max_counters: usize) -> String {
    let entries: Vec<String> = counters
        .iter()
        .map(|(status, samples)| {
            let formatted: Vec<String> = if samples.len() < max_counters {
                samples.iter().map(|v| format!("{:.2}", v)).collect()
            } else {
                let half = max_counters / 2;
                let head = samples[..half].iter().map(|v| format!("{:.2}", v));
                let tail = samples[samples.len() - half..]
                    .iter()
                    .map(|v| format!("{:.2}", v));
                head.chain(std::iter::once("...".to_string()))
                    .chain(tail)
                    .collect()
            };
            format!("{}: [{}]", status, formatted.join(", "))
        })
        .collect();

    format!("{{{}}}", entries.join(", "))
}
