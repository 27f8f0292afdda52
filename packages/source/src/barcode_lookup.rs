//! Barcode Lookup product search.
//!
//! Requires an API key passed as the `key` query parameter. Unknown codes
//! are answered with HTTP 404.
//!
//! - `GET /v3/products?barcode={code}&key={key}`
//!
//! See <https://www.barcodelookup.com/api>

use async_trait::async_trait;
use reqwest::StatusCode;
use upc_verify_models::{LookupOutcome, ValidCode};

use crate::{SourceAdapter, SourceConfig, SourceError, http};

/// Barcode Lookup adapter.
pub struct BarcodeLookupSource {
    config: SourceConfig,
    client: reqwest::Client,
    api_key: String,
}

impl BarcodeLookupSource {
    /// Creates a new Barcode Lookup adapter using `api_key`.
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
impl SourceAdapter for BarcodeLookupSource {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn lookup(&self, code: &ValidCode) -> LookupOutcome {
        let code = code.formatted(self.config.code_format);
        let request = self
            .client
            .get(self.config.url("/v3/products"))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("barcode", code.as_str()), ("key", self.api_key.as_str())]);

        http::lookup_json(&self.config.id, request, &[StatusCode::NOT_FOUND], |body| {
            parse_response(body, &self.config.id)
        })
        .await
    }
}

/// Parses a product search response. The title already carries the brand.
fn parse_response(body: &serde_json::Value, source_id: &str) -> LookupOutcome {
    let Some(products) = body.get("products").and_then(serde_json::Value::as_array) else {
        return LookupOutcome::transient("Barcode Lookup response has no products array");
    };

    let title = products
        .first()
        .and_then(|p| p["title"].as_str())
        .map(str::trim)
        .unwrap_or("");

    if title.is_empty() {
        LookupOutcome::NotFound
    } else {
        LookupOutcome::found(title, source_id)
    }
}
