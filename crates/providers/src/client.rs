use homebot_core::Error;
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;
use tracing::{info, warn};

/// Effective proxy choice for one backend.
enum ProxyResolution {
    UseProxy(String),
    /// `proxy = ""` disables every proxy, environment included.
    ForceDirectConnect,
    /// Leave it to reqwest (HTTPS_PROXY / HTTP_PROXY).
    None,
}

fn resolve_proxy(proxy: Option<&str>) -> ProxyResolution {
    match proxy.map(str::trim) {
        Some("") => ProxyResolution::ForceDirectConnect,
        Some(p) => ProxyResolution::UseProxy(p.to_string()),
        None => ProxyResolution::None,
    }
}

/// Builds a reqwest client with the per-backend timeout and proxy.
pub fn build_http_client(proxy: Option<&str>, api_base: &str, timeout: Duration) -> Client {
    let mut builder = Client::builder().timeout(timeout);

    match resolve_proxy(proxy) {
        ProxyResolution::UseProxy(proxy_url) => match Proxy::all(&proxy_url) {
            Ok(p) => {
                info!(proxy = %proxy_url, api_base = %api_base, "Using proxy");
                builder = builder.proxy(p);
            }
            Err(e) => {
                warn!(error = %e, proxy = %proxy_url, "Invalid proxy URL, falling back to direct connect");
            }
        },
        ProxyResolution::ForceDirectConnect => {
            info!(api_base = %api_base, "Proxy disabled, direct connect");
            builder = builder.no_proxy();
        }
        ProxyResolution::None => {}
    }

    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to build HTTP client with proxy, using default");
        Client::new()
    })
}

/// 5xx and 429 are worth retrying, other statuses are not.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Transport-level failure (connect refused, timeout, reset). Always
/// retryable.
pub fn transport_error(backend: &str, e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() { "timed out" } else { "failed" };
    Error::provider(format!("{} request {}: {}", backend, kind, e), true)
}

pub fn status_error(backend: &str, status: StatusCode, body: &str) -> Error {
    let end = truncate_at_char_boundary(body, 500);
    Error::provider(
        format!("{} API error {}: {}", backend, status, &body[..end]),
        is_retryable_status(status),
    )
}

/// Largest byte index <= `max_bytes` that falls on a char boundary.
pub fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}
