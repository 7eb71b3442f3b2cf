//! Classification of failed requests.
//!
//! A request fails either with an HTTP status outside 2xx/3xx or with a
//! transport error from reqwest. Both are folded into a [`RequestFailure`]
//! so the run results can count and describe them uniformly.

use std::fmt;

/// Categories of errors that can occur during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// HTTP 4xx
    ClientError,

    /// HTTP 5xx
    ServerError,

    /// DNS, refused connections, broken bodies
    NetworkError,

    TimeoutError,

    TlsError,

    OtherError,
}

impl ErrorCategory {
    /// Categorize an HTTP status code. Returns `None` for 1xx-3xx.
    pub fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            100..=399 => None,
            400..=499 => Some(ErrorCategory::ClientError),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::OtherError),
        }
    }

    /// Categorize a reqwest transport error.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }
        if error.is_redirect() {
            return ErrorCategory::ClientError;
        }

        // TLS failures surface as connect errors; look at the message first.
        let error_msg = format!("{:?}", error).to_lowercase();
        if error_msg.contains("certificate") || error_msg.contains("tls") {
            return ErrorCategory::TlsError;
        }

        if error.is_connect() || error.is_request() || error.is_body() || error.is_decode() {
            ErrorCategory::NetworkError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Label used for metrics and as the error-table key.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "client_error",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::ClientError => "HTTP 4xx Client Errors",
            ErrorCategory::ServerError => "HTTP 5xx Server Errors",
            ErrorCategory::NetworkError => "Network/Connection Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::TlsError => "TLS/SSL Certificate Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A single failed request, ready to be recorded in the run results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    pub category: ErrorCategory,

    /// HTTP status when the server answered.
    pub status: Option<u16>,

    /// Human-readable description, e.g. `404 Not Found`.
    pub description: String,
}

impl RequestFailure {
    /// Builds a failure for an HTTP status, or `None` if the status is a success.
    pub fn from_status(status: u16) -> Option<Self> {
        ErrorCategory::from_status_code(status).map(|category| Self {
            category,
            status: Some(status),
            description: format!("{} {}", status, status_reason(status)),
        })
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            status: error.status().map(|s| s.as_u16()),
            description: error.to_string(),
        }
    }
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{}] HTTP {}: {}", self.category.label(), status, self.description),
            None => write!(f, "[{}] {}", self.category.label(), self.description),
        }
    }
}

/// Canonical reason phrase for a status code.
pub fn status_reason(status: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown Status")
}
