//! Single-shot HTTP helpers shared by all source adapters.
//!
//! Adapters must not retry, so unlike a general-purpose client wrapper this
//! module sends each request exactly once and classifies whatever comes back
//! into a [`LookupOutcome`]:
//!
//! - HTTP 429 → [`LookupOutcome::RateLimited`], with the `Retry-After`
//!   header as the hint when the source sends one.
//! - Any status the adapter lists as a negative answer (typically 404) →
//!   [`LookupOutcome::NotFound`].
//! - Timeouts, connection failures, other non-2xx statuses and bodies that
//!   are not JSON → [`LookupOutcome::TransientError`].
//! - A 2xx JSON body is handed to the adapter's parser.
//!
//! # Usage
//!
//! ```ignore
//! let request = self.client.get(&url);
//! http::lookup_json(&self.id, request, &[StatusCode::NOT_FOUND], |body| {
//!     parse_response(body, &self.id)
//! })
//! .await
//! ```

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use upc_verify_models::LookupOutcome;

/// Maximum length of the response body preview included in logs.
const BODY_PREVIEW_LEN: usize = 500;

/// How a response status should be treated before its body is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx: read and parse the body.
    Success,
    /// A status the source uses to say "no such product".
    Negative,
    /// HTTP 429.
    RateLimited,
    /// Anything else.
    Failure,
}

/// Classifies a response status for a source whose negative answers use
/// the statuses in `negative`.
#[must_use]
pub fn classify_status(status: StatusCode, negative: &[StatusCode]) -> StatusClass {
    if status == StatusCode::TOO_MANY_REQUESTS {
        StatusClass::RateLimited
    } else if negative.contains(&status) {
        StatusClass::Negative
    } else if status.is_success() {
        StatusClass::Success
    } else {
        StatusClass::Failure
    }
}

/// Reads a `Retry-After` header given in delta-seconds.
///
/// HTTP-date values are ignored; the caller's own backoff applies instead.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Sends `request` once and turns the reply into a [`LookupOutcome`].
///
/// `parse` receives the decoded JSON body of a 2xx response.
#[allow(clippy::future_not_send)]
pub async fn lookup_json<F>(
    source_id: &str,
    request: reqwest::RequestBuilder,
    negative: &[StatusCode],
    parse: F,
) -> LookupOutcome
where
    F: FnOnce(&serde_json::Value) -> LookupOutcome,
{
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            log::warn!("{source_id}: request failed: {e}");
            return LookupOutcome::transient(describe(&e));
        }
    };

    let status = response.status();
    match classify_status(status, negative) {
        StatusClass::RateLimited => {
            let retry_hint = retry_after(response.headers());
            log::warn!("{source_id}: HTTP 429 (rate limited, retry hint {retry_hint:?})");
            return LookupOutcome::RateLimited {
                source_id: source_id.to_string(),
                retry_hint,
            };
        }
        StatusClass::Negative => {
            log::debug!("{source_id}: HTTP {status} (no such product)");
            return LookupOutcome::NotFound;
        }
        StatusClass::Failure => {
            log::warn!("{source_id}: HTTP {status}");
            return LookupOutcome::transient(format!("HTTP {status}"));
        }
        StatusClass::Success => {}
    }

    let url = response.url().to_string();
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            log::warn!("{source_id}: response body read failed\n  url: {url}\n  error: {e}");
            return LookupOutcome::transient(describe(&e));
        }
    };

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(body) => parse(&body),
        Err(e) => {
            log::warn!(
                "{source_id}: JSON parse failed\n  \
                 url: {url}\n  \
                 status: {status}\n  \
                 received: {} bytes\n  \
                 parse error: {e}\n  \
                 body preview: {}",
                text.len(),
                preview(&text),
            );
            LookupOutcome::transient(format!("JSON parse failed: {e}"))
        }
    }
}

/// Short description of a transport error.
fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timeout: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

/// First [`BODY_PREVIEW_LEN`] characters of a body.
fn preview(text: &str) -> String {
    if text.chars().count() > BODY_PREVIEW_LEN {
        let head: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}
