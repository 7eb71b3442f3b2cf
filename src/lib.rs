//! HTTP load runner and trace-driven workload injector.
//!
//! Two modes share one engine ([`engine::run_load`]):
//! - a single run of `-n` requests per worker, or for `-d` seconds;
//! - trace replay ([`scheduler::replay_trace`]), where each line of a trace
//!   file is the concurrency of one timeslot and each slot is started as its
//!   own run, one per time unit, without waiting for earlier slots.
//!
//! [`aggregator`] is the other half of a trace experiment: it listens for the
//! statsd lines the engine emits and prints per-second latency statistics
//! next to the number of active slots.

pub mod aggregator;
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod gauge;
pub mod logging;
pub mod metrics;
pub mod results;
pub mod scheduler;
pub mod slot;
pub mod statsd;
pub mod trace;
pub mod utils;
