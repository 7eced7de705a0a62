use crate::common::error::{ResolveError, Result};
use reqwest::Response;
use std::time::Duration;

const USER_AGENT: &str = concat!("address_resolver/", env!("CARGO_PKG_VERSION"));

/// Shared reqwest client with a per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .gzip(true)
        .build()?)
}

/// Map a transport failure onto the error taxonomy. Timeouts are reported as
/// such, everything else is an API error for `collaborator`.
pub fn transport_error(collaborator: &str, timeout: Duration, e: reqwest::Error) -> ResolveError {
    if e.is_timeout() {
        ResolveError::timeout(&format!("{} request", collaborator), timeout.as_millis() as u64)
    } else {
        ResolveError::api(collaborator, e.status().map(|s| s.as_u16()), e.to_string())
    }
}

/// Body of a 2xx response. Non-2xx becomes an API error carrying the status.
pub async fn success_body(collaborator: &str, timeout: Duration, resp: Response) -> Result<String> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| transport_error(collaborator, timeout, e))?;
    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return Err(ResolveError::api(collaborator, Some(status.as_u16()), snippet));
    }
    Ok(body)
}
