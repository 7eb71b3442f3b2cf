//! The load-generation engine.
//!
//! [`run_load`] performs one bounded run: `workers` concurrent tasks, each
//! sending requests back to back until it has done `runs_per_worker` of them
//! or the optional `duration` is over. Each call builds its own HTTP client
//! from [`EngineParams::client`], so concurrent runs never share connection
//! pools or any other state.

use reqwest::{Method, Url};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info};

use crate::client::{build_client, ClientConfig, ClientError};
use crate::errors::RequestFailure;
use crate::metrics::{
    REQUEST_DURATION_SECONDS, REQUEST_ERRORS_BY_CATEGORY, REQUEST_STATUS_CODES, REQUEST_TOTAL,
};
use crate::results::RunResults;
use crate::statsd::StatsdClient;

/// Upper bound on concurrent workers in one run.
pub const MAX_WORKERS: usize = 1_000_000;

/// Errors that prevent a run from starting.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid target URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{requested} workers requested, at most {max} are supported")]
    TooManyWorkers { requested: usize, max: usize },

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Everything one engine run needs.
#[derive(Clone)]
pub struct EngineParams {
    pub url: String,
    pub method: Method,
    pub body: Option<String>,
    pub client: ClientConfig,

    /// Number of concurrent workers.
    pub workers: usize,

    /// Requests per worker. `None` means "until `duration` runs out".
    pub runs_per_worker: Option<u64>,

    pub duration: Option<Duration>,

    /// Per-request statsd timers and counters.
    pub statsd: Option<Arc<StatsdClient>>,
}

impl EngineParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            body: None,
            client: ClientConfig::default(),
            workers: 1,
            runs_per_worker: Some(1),
            duration: None,
            statsd: None,
        }
    }

    /// Total number of requests this run will send, if bounded by count.
    pub fn total_requests(&self) -> Option<u64> {
        match (self.runs_per_worker, self.duration) {
            (Some(runs), None) => Some(runs * self.workers as u64),
            _ => None,
        }
    }
}

struct WorkerContext {
    client: reqwest::Client,
    url: Url,
    method: Method,
    body: Option<String>,
    statsd: Option<Arc<StatsdClient>>,
    statsd_name: String,
}

/// Runs the load described by `params` and returns the merged results.
pub async fn run_load(params: &EngineParams) -> Result<RunResults, EngineError> {
    if params.workers > MAX_WORKERS {
        return Err(EngineError::TooManyWorkers {
            requested: params.workers,
            max: MAX_WORKERS,
        });
    }
    let url = Url::parse(&params.url).map_err(|e| EngineError::InvalidUrl {
        url: params.url.clone(),
        reason: e.to_string(),
    })?;
    let client = build_client(&params.client)?;

    let ctx = Arc::new(WorkerContext {
        statsd_name: statsd_metric_name(&params.method, &url),
        client,
        url,
        method: params.method.clone(),
        body: params.body.clone(),
        statsd: params.statsd.clone(),
    });

    let start = Instant::now();
    let deadline = params.duration.map(|d| start + d);

    debug!(
        url = %ctx.url,
        workers = params.workers,
        runs_per_worker = ?params.runs_per_worker,
        duration = ?params.duration,
        "Engine run starting"
    );

    let mut handles = Vec::new();
    for task_id in 0..params.workers {
        let ctx = Arc::clone(&ctx);
        let max_runs = params.runs_per_worker;
        handles.push(tokio::spawn(async move {
            run_worker(task_id, &ctx, max_runs, deadline).await
        }));
    }

    let mut results = RunResults::new();
    for handle in handles {
        match handle.await {
            Ok(worker_results) => results.merge(worker_results),
            Err(e) => error!(error = %e, "Engine worker task failed"),
        }
    }
    results.elapsed = start.elapsed();

    info!(
        url = %ctx.url,
        responses = results.count(),
        errors = results.error_count(),
        elapsed_ms = results.elapsed.as_millis() as u64,
        "Engine run finished"
    );

    Ok(results)
}

async fn run_worker(
    task_id: usize,
    ctx: &WorkerContext,
    max_runs: Option<u64>,
    deadline: Option<Instant>,
) -> RunResults {
    let mut results = RunResults::new();
    let mut runs = 0u64;

    loop {
        if max_runs.is_some_and(|max| runs >= max) {
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if max_runs.is_none() && deadline.is_none() {
            break;
        }
        runs += 1;

        REQUEST_TOTAL.inc();
        let request_start = time::Instant::now();

        match build_request(ctx).send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();

                // Drain the body so bandwidth is part of the latency.
                while let Ok(Some(_chunk)) = response.chunk().await {}

                let latency = request_start.elapsed();
                results.record_response(status, latency);
                let status_label = status.to_string();
                REQUEST_STATUS_CODES
                    .with_label_values(&[status_label.as_str()])
                    .inc();
                if let Some(failure) = RequestFailure::from_status(status) {
                    REQUEST_ERRORS_BY_CATEGORY
                        .with_label_values(&[failure.category.label()])
                        .inc();
                }

                if let Some(ref statsd) = ctx.statsd {
                    statsd.timing(&ctx.statsd_name, latency);
                    statsd.incr(&format!("{}.{}", ctx.statsd_name, status), 1);
                }

                debug!(task_id = task_id, status_code = status, "Request completed");
            }
            Err(e) => {
                let failure = RequestFailure::from_reqwest(&e);
                results.record_transport_failure(&failure);
                REQUEST_STATUS_CODES.with_label_values(&["error"]).inc();
                REQUEST_ERRORS_BY_CATEGORY
                    .with_label_values(&[failure.category.label()])
                    .inc();

                debug!(
                    task_id = task_id,
                    url = %ctx.url,
                    error = %e,
                    error_category = %failure.category.label(),
                    "Request failed"
                );
            }
        }

        REQUEST_DURATION_SECONDS.observe(request_start.elapsed().as_secs_f64());
    }

    results
}

fn build_request(ctx: &WorkerContext) -> reqwest::RequestBuilder {
    let req = ctx.client.request(ctx.method.clone(), ctx.url.clone());
    match ctx.body {
        Some(ref body) if ctx.method == Method::POST || ctx.method == Method::PUT => {
            req.body(body.clone())
        }
        _ => req,
    }
}

/// `<METHOD>.<host>.<path>`, the name requests are reported under.
pub fn statsd_metric_name(method: &Method, url: &Url) -> String {
    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => "unknown".to_string(),
    };
    format!("{}.{}.{}", method, host, url.path())
}
