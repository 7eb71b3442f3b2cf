use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur when building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid header name '{0}'")]
    HeaderName(String),

    #[error("Invalid value for header '{0}'")]
    HeaderValue(String),

    #[error("Invalid DNS override '{0}': expected 'hostname:ip:port'")]
    DnsOverride(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub content_type: Option<String>,
    /// `user:password` for basic auth.
    pub auth: Option<String>,
    pub headers: Vec<(String, String)>,
    pub skip_tls_verify: bool,
    /// `hostname:ip:port`
    pub resolve_target_addr: Option<String>,
    pub timeout: Option<Duration>,
}

/// Builds a reqwest HTTP client with the specified configuration.
///
/// Every engine run builds its own client so no connection pool or header
/// state is shared between concurrent slots.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ClientError> {
    let mut client_builder = reqwest::Client::builder();

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            let (host, addr) = parse_dns_override(resolve_str)?;
            debug!(host = %host, addr = %addr, "Applying DNS override");
            client_builder = client_builder.resolve(&host, addr);
        }
    }

    let headers = default_headers(config)?;
    if !headers.is_empty() {
        client_builder = client_builder.default_headers(headers);
    }

    if let Some(timeout) = config.timeout {
        client_builder = client_builder.timeout(timeout);
    }

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(client_builder.build()?)
}

/// Headers sent with every request: content type, basic auth, then custom
/// headers (which override the first two on a name clash).
pub fn default_headers(config: &ClientConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();

    if let Some(ref content_type) = config.content_type {
        let value = HeaderValue::from_str(content_type)
            .map_err(|_| ClientError::HeaderValue(CONTENT_TYPE.to_string()))?;
        headers.insert(CONTENT_TYPE, value);
    }

    if let Some(ref auth) = config.auth {
        let encoded = STANDARD.encode(auth.as_bytes());
        let mut value = HeaderValue::from_str(&format!("Basic {}", encoded))
            .map_err(|_| ClientError::HeaderValue(AUTHORIZATION.to_string()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in &config.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ClientError::HeaderName(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| ClientError::HeaderValue(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

fn parse_dns_override(resolve_str: &str) -> Result<(String, SocketAddr), ClientError> {
    let invalid = || ClientError::DnsOverride(resolve_str.to_string());

    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    let [host, ip, port] = parts.as_slice() else {
        return Err(invalid());
    };
    if host.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(invalid());
    }

    let port: u16 = port.parse().map_err(|_| invalid())?;
    let addr: SocketAddr = format!("{}:{}", ip, port).parse().map_err(|_| invalid())?;

    Ok((host.to_string(), addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers_basic_auth() {
        let config = ClientConfig {
            auth: Some("user:pass".to_string()),
            ..Default::default()
        };
        let headers = default_headers(&config).unwrap();

        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Basic dXNlcjpwYXNz"
        );
    }

    #[test]
    fn test_custom_header_overrides_content_type() {
        let config = ClientConfig {
            content_type: Some("text/plain".to_string()),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("X-Run".to_string(), "7".to_string()),
            ],
            ..Default::default()
        };
        let headers = default_headers(&config).unwrap();

        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(headers.get("x-run").unwrap(), "7");
    }

    #[test]
    fn test_invalid_header_name() {
        let config = ClientConfig {
            headers: vec![("bad header".to_string(), "v".to_string())],
            ..Default::default()
        };
        assert!(matches!(
            default_headers(&config),
            Err(ClientError::HeaderName(_))
        ));
    }

    #[test]
    fn test_parse_dns_override() {
        let (host, addr) = parse_dns_override("example.com:127.0.0.1:8080").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());

        assert!(parse_dns_override("example.com:127.0.0.1").is_err());
        assert!(parse_dns_override(":127.0.0.1:80").is_err());
        assert!(parse_dns_override("example.com:127.0.0.1:notaport").is_err());
    }

    #[test]
    fn test_build_client() {
        let config = ClientConfig {
            content_type: Some("text/plain".to_string()),
            timeout: Some(Duration::from_secs(5)),
            skip_tls_verify: true,
            ..Default::default()
        };
        assert!(build_client(&config).is_ok());
    }
}
