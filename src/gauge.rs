//! Count of slot runs currently in flight.
//!
//! The count itself lives behind a mutex so concurrent slot tasks never lose
//! an update. Every change is forwarded to the configured [`GaugeSink`]s once
//! the lock has been released.

use std::sync::{Arc, Mutex, PoisonError};
use tracing::{trace, warn};

/// Destination for gauge values (statsd, prometheus, ...).
pub trait GaugeSink: Send + Sync {
    fn emit(&self, name: &str, value: u64);
}

/// Shared counter of active slot runs.
pub struct ConcurrencyGauge {
    name: String,
    count: Mutex<u64>,
    sinks: Vec<Arc<dyn GaugeSink>>,
}

impl ConcurrencyGauge {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            count: Mutex::new(0),
            sinks: Vec::new(),
        }
    }

    /// Adds a sink that receives every new value.
    pub fn with_sink(mut self, sink: Arc<dyn GaugeSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current count.
    pub fn current(&self) -> u64 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increments the count and emits the new value.
    pub fn increment(&self) -> u64 {
        let value = {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            *count += 1;
            *count
        };
        self.emit(value);
        value
    }

    /// Decrements the count and emits the new value. The count never drops
    /// below zero; an unmatched decrement is logged and ignored.
    pub fn decrement(&self) -> u64 {
        let value = {
            let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
            match count.checked_sub(1) {
                Some(v) => *count = v,
                None => warn!(gauge = %self.name, "Decrement without matching increment"),
            }
            *count
        };
        self.emit(value);
        value
    }

    /// Increments now and returns a guard that decrements when dropped.
    pub fn enter(self: &Arc<Self>) -> ActiveGuard {
        self.increment();
        ActiveGuard {
            gauge: Arc::clone(self),
        }
    }

    fn emit(&self, value: u64) {
        trace!(gauge = %self.name, value = value, "Gauge updated");
        for sink in &self.sinks {
            sink.emit(&self.name, value);
        }
    }
}

/// Keeps the gauge incremented for as long as it is alive.
///
/// Dropping it (normal return, early `?` return or unwinding) decrements.
pub struct ActiveGuard {
    gauge: Arc<ConcurrencyGauge>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.gauge.decrement();
    }
}
