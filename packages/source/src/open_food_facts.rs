//! Open Food Facts product lookup.
//!
//! Free and keyless. The v0 product endpoint answers unknown codes with
//! HTTP 200 and `"status": 0`, so a negative answer is read from the body
//! rather than the status line.
//!
//! - `GET /api/v0/product/{code}.json`
//!
//! See <https://openfoodfacts.github.io/openfoodfacts-server/api/>

use async_trait::async_trait;
use reqwest::StatusCode;
use upc_verify_models::{LookupOutcome, ValidCode};

use crate::{SourceAdapter, SourceConfig, SourceError, http, product_name};

/// Open Food Facts adapter.
pub struct OpenFoodFactsSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl OpenFoodFactsSource {
    /// Creates a new Open Food Facts adapter.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = config.build_client()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl SourceAdapter for OpenFoodFactsSource {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn lookup(&self, code: &ValidCode) -> LookupOutcome {
        let code = code.formatted(self.config.code_format);
        let url = self.config.url(&format!("/api/v0/product/{code}.json"));
        let request = self.client.get(&url);

        http::lookup_json(&self.config.id, request, &[StatusCode::NOT_FOUND], |body| {
            parse_response(body, &self.config.id)
        })
        .await
    }
}

/// Parses the v0 product response.
fn parse_response(body: &serde_json::Value, source_id: &str) -> LookupOutcome {
    let Some(status) = body.get("status").and_then(serde_json::Value::as_i64) else {
        return LookupOutcome::transient("Open Food Facts response has no status");
    };

    if status != 1 {
        return LookupOutcome::NotFound;
    }

    let product = &body["product"];
    let name = product["product_name"].as_str().unwrap_or("").trim();
    if name.is_empty() {
        return LookupOutcome::NotFound;
    }

    LookupOutcome::found(
        product_name(product["brands"].as_str(), name),
        source_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_found_product() {
        let body = serde_json::json!({
            "status": 1,
            "product": {
                "product_name": "Waffle Cookie",
                "brands": "Stonewall Kitchen"
            }
        });
        assert_eq!(
            parse_response(&body, "openfoodfacts"),
            LookupOutcome::found("Stonewall Kitchen Waffle Cookie", "openfoodfacts")
        );
    }

    #[test]
    fn parses_unknown_product() {
        let body = serde_json::json!({
            "status": 0,
            "status_verbose": "product not found"
        });
        assert_eq!(parse_response(&body, "openfoodfacts"), LookupOutcome::NotFound);
    }

    #[test]
    fn nameless_product_is_not_found() {
        let body = serde_json::json!({
            "status": 1,
            "product": { "product_name": "  ", "brands": "Acme" }
        });
        assert_eq!(parse_response(&body, "openfoodfacts"), LookupOutcome::NotFound);
    }

    #[test]
    fn malformed_body_is_transient() {
        let body = serde_json::json!(["unexpected"]);
        assert!(matches!(
            parse_response(&body, "openfoodfacts"),
            LookupOutcome::TransientError { .. }
        ));
    }
}
