//! UPCitemdb product lookup.
//!
//! Without a user key the free trial endpoint is used, which allows roughly
//! 100 lookups per day and answers bursts with HTTP 429. With a key the
//! paid `v1` endpoint is used and the key is sent in the `user_key` header.
//!
//! - Trial: `GET /prod/trial/lookup?upc={code}`
//! - Paid: `GET /prod/v1/lookup?upc={code}`
//!
//! See <https://www.upcitemdb.com/api/explorer>

use async_trait::async_trait;
use reqwest::StatusCode;
use upc_verify_models::{LookupOutcome, ValidCode};

use crate::{SourceAdapter, SourceConfig, SourceError, http, product_name};

/// Title used when a match carries no title of its own.
const UNTITLED_PRODUCT: &str = "Product found";

/// UPCitemdb adapter.
pub struct UpcItemDbSource {
    config: SourceConfig,
    client: reqwest::Client,
    user_key: Option<String>,
}

impl UpcItemDbSource {
    /// Creates a new UPCitemdb adapter. Pass `user_key` to use the paid
    /// endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built or the
    /// key is not a valid header value.
    pub fn new(config: SourceConfig, user_key: Option<String>) -> Result<Self, SourceError> {
        if let Some(key) = &user_key {
            reqwest::header::HeaderValue::from_str(key).map_err(|e| {
                SourceError::InvalidHeader {
                    source_id: config.id.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        let client = config.build_client()?;
        Ok(Self {
            config,
            client,
            user_key,
        })
    }

    fn endpoint(&self) -> String {
        if self.user_key.is_some() {
            self.config.url("/prod/v1/lookup")
        } else {
            self.config.url("/prod/trial/lookup")
        }
    }
}

#[async_trait]
impl SourceAdapter for UpcItemDbSource {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    async fn lookup(&self, code: &ValidCode) -> LookupOutcome {
        let code = code.formatted(self.config.code_format);
        let mut request = self
            .client
            .get(self.endpoint())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("upc", code.as_str())]);

        if let Some(key) = &self.user_key {
            request = request.header("user_key", key).header("key_type", "3scale");
        }

        // 400 is INVALID_UPC, 404 is NOT_FOUND.
        http::lookup_json(
            &self.config.id,
            request,
            &[StatusCode::BAD_REQUEST, StatusCode::NOT_FOUND],
            |body| parse_response(body, &self.config.id),
        )
        .await
    }
}

/// Parses a lookup response.
fn parse_response(body: &serde_json::Value, source_id: &str) -> LookupOutcome {
    let Some(code) = body.get("code").and_then(serde_json::Value::as_str) else {
        return LookupOutcome::transient("UPCitemdb response has no code");
    };

    if code != "OK" {
        return LookupOutcome::NotFound;
    }

    let Some(item) = body["items"].as_array().and_then(|items| items.first()) else {
        return LookupOutcome::NotFound;
    };

    let title = item["title"]
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(UNTITLED_PRODUCT);

    LookupOutcome::found(product_name(item["brand"].as_str(), title), source_id)
}
