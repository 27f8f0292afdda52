#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Product lookup sources.
//!
//! Each external product database implements the [`SourceAdapter`] trait.
//! An adapter performs exactly one outbound request per lookup and folds
//! every possible result (match, miss, rate limit, failure) into a
//! [`LookupOutcome`] value. Retrying and fallback are the caller's job.
//!
//! Sources are configured through TOML files in `services/`, embedded at
//! compile time and exposed by the [`registry`]:
//!
//! 1. **Open Food Facts** (priority 1): free, no key, lenient limits.
//! 2. **UPCitemdb** (priority 2): free trial tier, strict daily limit.
//! 3. **Go-UPC** (priority 3): bearer token required.
//! 4. **Barcode Lookup** (priority 4): API key required.

pub mod barcode_lookup;
pub mod go_upc;
pub mod http;
pub mod open_food_facts;
pub mod progress;
pub mod registry;
pub mod upc_item_db;

use std::time::Duration;

use async_trait::async_trait;
use upc_verify_models::{LookupOutcome, ValidCode};

pub use upc_verify_models::CodeFormat;

/// Errors raised while building a source adapter.
///
/// Lookups themselves never fail with an error; see [`LookupOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A credential the source requires is not set.
    #[error("Source {source_id} requires the {env_var} environment variable")]
    MissingCredential {
        /// Source identifier.
        source_id: String,
        /// Environment variable that should hold the credential.
        env_var: String,
    },

    /// A configured header value cannot be sent.
    #[error("Invalid header value for source {source_id}: {message}")]
    InvalidHeader {
        /// Source identifier.
        source_id: String,
        /// Description of what went wrong.
        message: String,
    },
}

/// Construction-time configuration for one adapter.
///
/// Everything an adapter needs is resolved before the adapter is built.
/// Credentials are passed to the adapter constructors alongside this struct;
/// adapters never read the environment themselves.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Unique identifier (e.g., `"go_upc"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header to send, if the source cares.
    pub user_agent: Option<String>,
    /// Whether the code is sent as UPC-A or EAN-13.
    pub code_format: CodeFormat,
}

impl SourceConfig {
    /// Builds the HTTP client this source's requests go through.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the client cannot be built.
    pub fn build_client(&self) -> Result<reqwest::Client, SourceError> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        Ok(builder.build()?)
    }

    /// Joins `path` onto the base URL.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

/// A single external product lookup source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Returns a unique identifier for this source (e.g., `"upcitemdb"`).
    fn id(&self) -> &str;

    /// Returns the human-readable name of this source.
    fn name(&self) -> &str;

    /// Looks `code` up with exactly one outbound request.
    async fn lookup(&self, code: &ValidCode) -> LookupOutcome;
}

/// Joins a brand and a product title into a display name.
///
/// The brand is omitted when it is empty or when the title already starts
/// with it.
#[must_use]
pub fn product_name(brand: Option<&str>, title: &str) -> String {
    let title = title.trim();
    match brand.map(str::trim) {
        Some(brand)
            if !brand.is_empty() && !title.to_lowercase().starts_with(&brand.to_lowercase()) =>
        {
            format!("{brand} {title}").trim().to_string()
        }
        _ => title.to_string(),
    }
}
