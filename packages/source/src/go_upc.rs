//! Go-UPC product lookup.
//!
//! Requires a bearer token. Unknown codes are answered with HTTP 404.
//!
//! - `GET /api/v1/code/{code}`
//!
//! See <https://go-upc.com/api>

use async_trait::async_trait;
use reqwest::StatusCode;
use upc_verify_models::{LookupOutcome, ValidCode};

use crate::{SourceAdapter, SourceConfig, SourceError, http, product_name};

/// Go-UPC adapter.
pub struct GoUpcSource {
    config: SourceConfig,
    client: reqwest::Client,
    api_key: String,
}

impl GoUpcSource {
    /// Creates a new Go-UPC adapter authenticating with `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(config: SourceConfig, api_key: String) -> Result<Self, SourceError> {
        let client = config.build_client()?;
        Ok(Self {
            config,
            client,
            api_key,
        })
    }
}

#[async_trait]
impl SourceAdapter for GoUpcSource {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn lookup(&self, code: &ValidCode) -> LookupOutcome {
        let code = code.formatted(self.config.code_format);
        let url = self.config.url(&format!("/api/v1/code/{code}"));
        let request = self.client.get(&url).bearer_auth(&self.api_key);

        http::lookup_json(&self.config.id, request, &[StatusCode::NOT_FOUND], |body| {
            parse_response(body, &self.config.id)
        })
        .await
    }
}

/// Parses a code lookup response.
fn parse_response(body: &serde_json::Value, source_id: &str) -> LookupOutcome {
    if !body.is_object() {
        return LookupOutcome::transient("Go-UPC response is not an object");
    }

    let product = &body["product"];
    let name = product["name"].as_str().unwrap_or("").trim();
    if name.is_empty() {
        return LookupOutcome::NotFound;
    }

    LookupOutcome::found(product_name(product["brand"].as_str(), name), source_id)
}
