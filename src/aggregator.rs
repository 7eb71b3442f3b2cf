//! Statsd line aggregator.
//!
//! Listens for `name:value|unit` lines, folds them into a shared [`Rollup`]
//! and, once per period, swaps the rollup for an empty one and prints
//! `<active>\t<samples>\t<mean>\t<stddev>` for the window just closed.
//!
//! | unit | effect |
//! |------|--------|
//! | `c`  | added to the request counter |
//! | `ms` | appended to the timer samples |
//! | `g`  | replaces the gauge (last write in the window wins) |
//! | other | printed verbatim, not aggregated |
//!
//! The rollup lock is held only to apply one line or to swap the rollup out;
//! statistics are computed on the detached snapshot.

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Header printed before the first statistics line.
pub const STATS_HEADER: &str =
    "Concurrency\t# Requests\tAvg response time (ms)\tStdev response time";

/// Largest datagram accepted.
const MAX_DATAGRAM: usize = 65_535;

/// Errors for lines that are not `name:value|unit`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricParseError {
    #[error("missing ':' in metric line '{0}'")]
    MissingValue(String),

    #[error("missing '|' in metric line '{0}'")]
    MissingUnit(String),

    #[error("invalid value '{value}' in metric line '{line}'")]
    InvalidValue { line: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricUnit {
    Counter,
    Timer,
    Gauge,
    Unknown(String),
}

impl MetricUnit {
    fn from_wire(unit: &str) -> Self {
        match unit {
            "c" => MetricUnit::Counter,
            "ms" => MetricUnit::Timer,
            "g" => MetricUnit::Gauge,
            other => MetricUnit::Unknown(other.to_string()),
        }
    }
}

/// One parsed metric line.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
}

impl FromStr for MetricEvent {
    type Err = MetricParseError;

    /// Splits on the last `:` (names may contain `host:port`), then on `|`.
    /// Anything after a second `|` (sample rate, tags) is ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = line
            .rsplit_once(':')
            .ok_or_else(|| MetricParseError::MissingValue(line.to_string()))?;
        let (value, unit) = rest
            .split_once('|')
            .ok_or_else(|| MetricParseError::MissingUnit(line.to_string()))?;
        let unit = unit.split('|').next().unwrap_or(unit);

        let invalid = || MetricParseError::InvalidValue {
            line: line.to_string(),
            value: value.to_string(),
        };
        let value: f64 = value.trim().parse().map_err(|_| invalid())?;
        if !value.is_finite() {
            return Err(invalid());
        }

        Ok(MetricEvent {
            name: name.to_string(),
            value,
            unit: MetricUnit::from_wire(unit.trim()),
        })
    }
}

/// Aggregate of one window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rollup {
    pub timers: Vec<f64>,
    pub counter: f64,
    pub gauge: f64,
}

impl Rollup {
    /// Applies an event. Returns `false` for units that are not aggregated.
    pub fn apply(&mut self, event: &MetricEvent) -> bool {
        match event.unit {
            MetricUnit::Counter => self.counter += event.value,
            MetricUnit::Timer => self.timers.push(event.value),
            MetricUnit::Gauge => self.gauge = event.value,
            MetricUnit::Unknown(_) => return false,
        }
        true
    }

    /// Statistics over the timer samples; `None` if there are none.
    pub fn stats(&self) -> Option<RollupStats> {
        let samples = self.timers.len();
        if samples == 0 {
            return None;
        }

        let n = samples as f64;
        let mean = self.timers.iter().sum::<f64>() / n;
        let variance = self
            .timers
            .iter()
            .map(|x| (x - mean).powi(2))
            .sum::<f64>()
            / n;

        Some(RollupStats {
            active: self.gauge.max(0.0) as u64,
            samples,
            mean,
            stddev: variance.sqrt(),
            requests: self.counter,
        })
    }
}

/// Derived statistics for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupStats {
    /// Gauge value (active slots) at the end of the window.
    pub active: u64,
    pub samples: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    /// Counter total.
    pub requests: f64,
}

impl fmt::Display for RollupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t{:.3}\t{:.3}",
            self.active, self.samples, self.mean, self.stddev
        )
    }
}

/// The live rollup, shared by the receive loop and the rollup timer.
#[derive(Debug, Default)]
pub struct SharedRollup {
    inner: Mutex<Rollup>,
}

impl SharedRollup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: &MetricEvent) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(event)
    }

    /// Replaces the live rollup with an empty one and returns the old one.
    pub fn take_and_reset(&self) -> Rollup {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// What happened to a single input line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Aggregated,
    /// Parsed but with a unit that is not aggregated.
    Unknown,
    Malformed(MetricParseError),
    Empty,
}

/// Ingests metric lines and produces per-window statistics.
#[derive(Debug, Default)]
pub struct Aggregator {
    rollup: SharedRollup,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest_line(&self, line: &str) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Empty;
        }

        match line.parse::<MetricEvent>() {
            Ok(event) => {
                if self.rollup.record(&event) {
                    LineOutcome::Aggregated
                } else {
                    LineOutcome::Unknown
                }
            }
            Err(e) => LineOutcome::Malformed(e),
        }
    }

    /// Handles one datagram, which may hold several newline-separated lines.
    /// Lines with unknown units are echoed to stdout.
    pub fn ingest_datagram(&self, data: &[u8]) {
        let text = match std::str::from_utf8(data) {
            Ok(text) => text,
            Err(e) => {
                warn!(bytes = data.len(), error = %e, "Skipping datagram that is not valid UTF-8");
                return;
            }
        };

        for line in text.lines() {
            match self.ingest_line(line) {
                LineOutcome::Aggregated | LineOutcome::Empty => {}
                LineOutcome::Unknown => println!("{}", line),
                LineOutcome::Malformed(e) => warn!(error = %e, "Skipping malformed metric line"),
            }
        }
    }

    /// Closes the current window. `None` if it had no timer samples.
    pub fn rollup(&self) -> Option<RollupStats> {
        let snapshot = self.rollup.take_and_reset();
        snapshot.stats()
    }
}

/// Receives datagrams forever, feeding them to `aggregator`.
///
/// Receive errors are logged and the loop carries on.
pub async fn run_receiver(socket: UdpSocket, aggregator: Arc<Aggregator>) {
    if let Ok(addr) = socket.local_addr() {
        info!(addr = %addr, "Metrics aggregator listening");
    }

    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                debug!(peer = %peer, bytes = len, "Datagram received");
                aggregator.ingest_datagram(&buf[..len]);
            }
            Err(e) => warn!(error = %e, "Error receiving datagram"),
        }
    }
}

/// Closes a window every `period` and writes its statistics line to `out`.
pub async fn run_rollups<W: Write>(aggregator: Arc<Aggregator>, period: Duration, mut out: W) {
    if let Err(e) = writeln!(out, "{}", STATS_HEADER).and_then(|_| out.flush()) {
        error!(error = %e, "Failed to write statistics header");
    }

    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if let Some(stats) = aggregator.rollup() {
            if let Err(e) = writeln!(out, "{}", stats).and_then(|_| out.flush()) {
                error!(error = %e, "Failed to write statistics line");
            }
        }
    }
}
