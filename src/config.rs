use clap::{ArgAction, Parser, ValueEnum};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::engine::EngineParams;
use crate::logging::LogFormat;
use crate::statsd::{parse_statsd_address, StatsdClient, StatsdError, DEFAULT_STATSD_ADDRESS};
use crate::utils::{parse_duration_string, parse_header};

const BANNER: &str = "--------";

/// Errors found while validating the command line.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Target URL '{0}' must start with http:// or https://")]
    InvalidUrl(String),

    #[error("You can't provide data with {0}")]
    DataWithoutBody(Method),

    #[error("You can't use --quiet and --verbose at the same time")]
    QuietAndVerbose,

    #[error("{0}")]
    Header(String),

    #[error("Concurrency must be greater than 0")]
    ZeroConcurrency,

    #[error("Time unit must be greater than 0")]
    ZeroTimeUnit,

    #[error("Failed to read request data from {}: {source}", path.display())]
    DataFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Statsd(#[from] StatsdError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HttpMethod {
    #[value(name = "GET")]
    Get,
    #[value(name = "POST")]
    Post,
    #[value(name = "DELETE")]
    Delete,
    #[value(name = "PUT")]
    Put,
    #[value(name = "HEAD")]
    Head,
    #[value(name = "OPTIONS")]
    Options,
}

impl HttpMethod {
    pub fn to_method(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Delete => Method::DELETE,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Options => Method::OPTIONS,
        }
    }

    /// Only POST and PUT carry a request body.
    pub fn accepts_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put)
    }
}

/// Command line of the `iodid` binary. Most options can also be set
/// through the environment variable named in `--help`.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "iodid",
    version,
    about = "Simple HTTP load runner and trace injector"
)]
pub struct Cli {
    /// URL to hit
    #[arg(env = "TARGET_URL")]
    pub url: String,

    /// HTTP method
    #[arg(short, long, value_enum, ignore_case = true, default_value = "GET", env = "REQUEST_TYPE")]
    pub method: HttpMethod,

    /// Content-Type header
    #[arg(long, default_value = "text/plain", env = "CONTENT_TYPE")]
    pub content_type: String,

    /// Request body; prefix with '@' to read it from a file
    #[arg(short = 'D', long, env = "REQUEST_DATA")]
    pub data: Option<String>,

    /// Basic authentication user:password
    #[arg(short, long, env = "BASIC_AUTH")]
    pub auth: Option<String>,

    /// Custom header name:value (repeatable)
    #[arg(long = "header")]
    pub headers: Vec<String>,

    /// Concurrency
    #[arg(short, long, default_value_t = 1, env = "CONCURRENCY")]
    pub concurrency: usize,

    /// Number of requests per worker
    #[arg(short = 'n', long, default_value_t = 1, env = "REQUESTS", conflicts_with = "duration")]
    pub requests: u64,

    /// Duration of the run: seconds, or 30s / 10m / 2h / 1d
    #[arg(short, long, value_parser = parse_duration_string, env = "TEST_DURATION")]
    pub duration: Option<Duration>,

    /// File with the number of requests to inject per time unit
    #[arg(short, long, env = "TRACE_FILE")]
    pub trace: Option<PathBuf>,

    /// Time unit for the trace (default 1 second)
    #[arg(short = 'u', long, value_parser = parse_duration_string, default_value = "1", env = "TIME_UNIT")]
    pub time_unit: Duration,

    /// Send statsd metrics
    #[arg(long, env = "STATSD")]
    pub statsd: bool,

    /// Statsd address
    #[arg(long, default_value = DEFAULT_STATSD_ADDRESS, env = "STATSD_ADDRESS")]
    pub statsd_address: String,

    /// Prefix for statsd metric names
    #[arg(long, default_value = "iodid", env = "STATSD_PREFIX")]
    pub statsd_prefix: String,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Skip TLS certificate verification
    #[arg(long, env = "SKIP_TLS_VERIFY")]
    pub skip_tls_verify: bool,

    /// DNS override hostname:ip:port
    #[arg(long = "resolve", env = "RESOLVE_TARGET_ADDR")]
    pub resolve_target_addr: Option<String>,

    /// Per-request timeout
    #[arg(long, value_parser = parse_duration_string, default_value = "30s", env = "REQUEST_TIMEOUT")]
    pub timeout: Duration,

    /// Print the results as JSON
    #[arg(long)]
    pub json_output: bool,

    /// Don't display banners
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log format
    #[arg(long, value_enum, default_value = "text", env = "LOG_FORMAT")]
    pub log_format: LogFormat,
}

/// How the run is bounded.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    /// `requests` runs per worker.
    Requests(u64),
    Duration(Duration),
    /// Replay a trace, one slot per `time_unit`.
    Trace { path: PathBuf, time_unit: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsdSettings {
    pub address: String,
    pub prefix: String,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub method: Method,
    pub body: Option<String>,
    pub client: ClientConfig,
    pub concurrency: usize,
    pub mode: RunMode,
    pub statsd: Option<StatsdSettings>,
    pub metrics_port: Option<u16>,
    pub json_output: bool,
    pub quiet: bool,
    pub verbose: u8,
    pub log_format: LogFormat,
}

impl Config {
    /// Validates parsed arguments.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        if !cli.url.starts_with("http://") && !cli.url.starts_with("https://") {
            return Err(ConfigError::InvalidUrl(cli.url));
        }
        if cli.data.is_some() && !cli.method.accepts_body() {
            return Err(ConfigError::DataWithoutBody(cli.method.to_method()));
        }
        if cli.quiet && cli.verbose > 0 {
            return Err(ConfigError::QuietAndVerbose);
        }
        if cli.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if cli.trace.is_some() && cli.time_unit.is_zero() {
            return Err(ConfigError::ZeroTimeUnit);
        }

        let headers = cli
            .headers
            .iter()
            .map(|h| parse_header(h))
            .collect::<Result<Vec<_>, _>>()
            .map_err(ConfigError::Header)?;

        let body = match cli.data {
            Some(data) => Some(load_body(&data)?),
            None => None,
        };

        let statsd = if cli.statsd {
            parse_statsd_address(&cli.statsd_address)?;
            Some(StatsdSettings {
                address: cli.statsd_address,
                prefix: cli.statsd_prefix,
            })
        } else {
            None
        };

        let mode = match (cli.trace, cli.duration) {
            (Some(path), _) => RunMode::Trace {
                path,
                time_unit: cli.time_unit,
            },
            (None, Some(duration)) => RunMode::Duration(duration),
            (None, None) => RunMode::Requests(cli.requests),
        };

        Ok(Config {
            target_url: cli.url,
            method: cli.method.to_method(),
            body,
            client: ClientConfig {
                content_type: Some(cli.content_type),
                auth: cli.auth,
                headers,
                skip_tls_verify: cli.skip_tls_verify,
                resolve_target_addr: cli.resolve_target_addr,
                timeout: Some(cli.timeout),
            },
            concurrency: cli.concurrency,
            mode,
            statsd,
            metrics_port: cli.metrics_port,
            json_output: cli.json_output,
            quiet: cli.quiet,
            verbose: cli.verbose,
            log_format: cli.log_format,
        })
    }

    /// Creates the statsd client, if enabled.
    pub fn statsd_client(&self) -> Result<Option<Arc<StatsdClient>>, StatsdError> {
        match self.statsd {
            Some(ref settings) => Ok(Some(Arc::new(StatsdClient::new(
                &settings.address,
                &settings.prefix,
            )?))),
            None => Ok(None),
        }
    }

    /// Engine parameters for a fixed-count or duration run. Trace slots
    /// override the worker and run counts.
    pub fn engine_params(&self, statsd: Option<Arc<StatsdClient>>) -> EngineParams {
        let (runs_per_worker, duration) = match self.mode {
            RunMode::Requests(n) => (Some(n), None),
            RunMode::Duration(d) => (None, Some(d)),
            RunMode::Trace { .. } => (Some(1), None),
        };

        EngineParams {
            url: self.target_url.clone(),
            method: self.method.clone(),
            body: self.body.clone(),
            client: self.client.clone(),
            workers: self.concurrency,
            runs_per_worker,
            duration,
            statsd,
        }
    }

    /// One-line description of what is about to run.
    pub fn banner(&self) -> String {
        match self.mode {
            RunMode::Requests(n) => format!(
                "{} Running {} queries - concurrency {} {}",
                BANNER,
                n.saturating_mul(self.concurrency as u64),
                self.concurrency,
                BANNER
            ),
            RunMode::Duration(d) => format!(
                "{} Running for ~{} seconds - concurrency {} {}",
                BANNER,
                d.as_secs(),
                self.concurrency,
                BANNER
            ),
            RunMode::Trace { ref path, time_unit } => format!(
                "{} Injecting workload from {} every {:.3}s {}",
                BANNER,
                path.display(),
                time_unit.as_secs_f64(),
                BANNER
            ),
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self) {
        println!("Target:      {} {}", self.method, self.target_url);
        if let Some(ref ct) = self.client.content_type {
            println!("Content-Type: {}", ct);
        }
        if self.client.auth.is_some() {
            println!("Auth:        basic");
        }
        for (name, value) in &self.client.headers {
            println!("Header:      {}: {}", name, value);
        }
        if let Some(ref statsd) = self.statsd {
            println!("Statsd:      {} (prefix {})", statsd.address, statsd.prefix);
        }
        if self.client.skip_tls_verify {
            println!("TLS verify:  disabled");
        }
        println!();
        println!("{}", self.banner());
        println!();
    }
}

fn load_body(data: &str) -> Result<String, ConfigError> {
    match data.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).map_err(|source| ConfigError::DataFile {
                path: PathBuf::from(path),
                source,
            })
        }
        None => Ok(data.to_string()),
    }
}
