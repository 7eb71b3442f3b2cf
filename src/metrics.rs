use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Gauge, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::env;
use tracing::{error, info};

use crate::gauge::GaugeSink;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "iodid".to_string());

    // === Request Metrics ===

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP requests by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_by_category_total", "Number of failed HTTP requests by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Trace Replay Metrics ===

    pub static ref ACTIVE_SLOTS: Gauge =
        Gauge::with_opts(
            Opts::new("active_slots", "Number of trace slots currently running")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref SLOTS_DISPATCHED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("slots_dispatched_total", "Total number of trace slots dispatched")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref SLOT_FAILURES_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("slot_failures_total", "Number of trace slots whose run failed")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Request metrics
    prometheus::default_registry().register(Box::new(REQUEST_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;
    prometheus::default_registry().register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;

    // Trace replay metrics
    prometheus::default_registry().register(Box::new(ACTIVE_SLOTS.clone()))?;
    prometheus::default_registry().register(Box::new(SLOTS_DISPATCHED_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(SLOT_FAILURES_TOTAL.clone()))?;

    Ok(())
}

/// Mirrors the active slot count into the `active_slots` gauge.
pub struct PrometheusGaugeSink;

impl GaugeSink for PrometheusGaugeSink {
    fn emit(&self, _name: &str, value: u64) {
        ACTIVE_SLOTS.set(value as f64);
    }
}

fn encode_registry(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let response = match encode_registry(&registry) {
        Ok(buffer) => {
            let mut response = Response::new(Body::from(buffer));
            if let Ok(value) = TextEncoder::new().format_type().parse() {
                response.headers_mut().insert(CONTENT_TYPE, value);
            }
            response
        }
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            let mut response = Response::new(Body::from("failed to encode metrics"));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    };

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Registry) -> String {
    match encode_registry(registry) {
        Ok(buffer) => String::from_utf8(buffer).unwrap_or_else(|e| {
            error!(error = %e, "Error encoding metrics to UTF-8");
            String::from("# ERROR ENCODING METRICS TO UTF-8")
        }),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            String::from("# ERROR ENCODING METRICS")
        }
    }
}
