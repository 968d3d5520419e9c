//! Shared HTTP plumbing for the remote embedding, index, and model clients.
//!
//! Every remote failure is classified once here: HTTP 429, 5xx, and
//! network errors are transient; any other 4xx is permanent.

use std::time::Duration;

use reqwest::StatusCode;

/// Build a client with a per-request timeout.
pub fn client(timeout_secs: u64) -> ragline_core::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ragline_core::Error::config(format!("failed to build HTTP client: {}", e)))
}

/// Whether a non-success status is worth retrying.
pub fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Human-readable description of a failed response.
pub async fn describe_failure(service: &str, response: reqwest::Response) -> (String, bool) {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    (
        format!("{} API error {}: {}", service, status, truncate(&body, 500)),
        is_transient(status),
    )
}

/// Describe a transport-level failure. These are always transient.
pub fn describe_transport(service: &str, url: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("{} request to {} timed out", service, url)
    } else {
        format!("{} connection error ({}): {}", service, url, err)
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::UNAUTHORIZED));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[test]
    fn truncate_on_char_boundary() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
