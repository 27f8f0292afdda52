//! Compile-time registry of product lookup source configurations.
//!
//! Each source is defined in a TOML file under `services/`. The registry
//! embeds these at compile time, exposes them via [`all_services`] and
//! [`enabled_services`], and turns them into adapters with
//! [`build_chain`].

use std::time::Duration;

use serde::Deserialize;

use crate::barcode_lookup::BarcodeLookupSource;
use crate::go_upc::GoUpcSource;
use crate::open_food_facts::OpenFoodFactsSource;
use crate::upc_item_db::UpcItemDbSource;
use crate::{CodeFormat, SourceAdapter, SourceConfig, SourceError};

/// Environment variable holding a comma-separated list of source ids to
/// use, in priority order.
pub const SOURCES_ENV_VAR: &str = "UPC_VERIFY_SOURCES";

/// A lookup source configuration loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceService {
    /// Unique identifier (e.g., `"openfoodfacts"`, `"upcitemdb"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this source takes part in lookups by default.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lookup order. Lower values are asked first.
    pub priority: u32,
    /// Endpoint and transport settings.
    pub http: HttpSettings,
    /// Provider-specific configuration.
    pub provider: ProviderConfig,
}

/// Endpoint and transport settings shared by every provider.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    /// API base URL (e.g., `"https://api.upcitemdb.com"`).
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// `User-Agent` header to send.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// How the code is sent.
    #[serde(default)]
    pub code_format: CodeFormat,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Open Food Facts, keyless.
    OpenFoodFacts,
    /// UPCitemdb. Uses the paid endpoint when the key is set.
    UpcItemDb {
        /// Environment variable holding the optional user key.
        #[serde(default)]
        user_key_env: Option<String>,
    },
    /// Go-UPC, bearer token.
    GoUpc {
        /// Environment variable holding the bearer token.
        api_key_env: String,
    },
    /// Barcode Lookup, query-string key.
    BarcodeLookup {
        /// Environment variable holding the API key.
        api_key_env: String,
    },
}

const fn default_true() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    10
}

impl SourceService {
    /// Returns the construction-time adapter configuration.
    #[must_use]
    pub fn config(&self) -> SourceConfig {
        SourceConfig {
            id: self.id.clone(),
            name: self.name.clone(),
            base_url: self.http.base_url.clone(),
            timeout: Duration::from_secs(self.http.timeout_secs),
            user_agent: self.http.user_agent.clone(),
            code_format: self.http.code_format,
        }
    }

    /// Environment variable holding this source's credential, if any.
    #[must_use]
    pub fn credential_env(&self) -> Option<&str> {
        match &self.provider {
            ProviderConfig::OpenFoodFacts => None,
            ProviderConfig::UpcItemDb { user_key_env } => user_key_env.as_deref(),
            ProviderConfig::GoUpc { api_key_env }
            | ProviderConfig::BarcodeLookup { api_key_env } => Some(api_key_env),
        }
    }
}

// ── Compile-time embedded TOML files ────────────────────────────────

const SERVICE_TOMLS: &[(&str, &str)] = &[
    ("openfoodfacts", include_str!("../services/openfoodfacts.toml")),
    ("upcitemdb", include_str!("../services/upcitemdb.toml")),
    ("go_upc", include_str!("../services/go_upc.toml")),
    (
        "barcode_lookup",
        include_str!("../services/barcode_lookup.toml"),
    ),
];

#[cfg(test)]
const EXPECTED_SERVICE_COUNT: usize = 4;

/// Returns all source configurations (enabled and disabled).
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_services() -> Vec<SourceService> {
    SERVICE_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            toml::de::from_str(toml_str)
                .unwrap_or_else(|e| panic!("Failed to parse source service '{name}': {e}"))
        })
        .collect()
}

/// Returns only enabled services, sorted by priority (ascending).
#[must_use]
pub fn enabled_services() -> Vec<SourceService> {
    let mut services: Vec<SourceService> =
        all_services().into_iter().filter(|s| s.enabled).collect();
    services.sort_by_key(|s| s.priority);
    services
}

/// Returns the services to use, filtered and ordered by the `--sources` CLI
/// flag or the [`SOURCES_ENV_VAR`] environment variable. If neither is
/// set, the enabled services are returned in priority order.
///
/// An explicit list may name disabled services and decides the order.
#[must_use]
pub fn selected_services(cli_filter: Option<String>) -> Vec<SourceService> {
    let filter = cli_filter.or_else(|| std::env::var(SOURCES_ENV_VAR).ok());

    let Some(filter_str) = filter.filter(|f| !f.trim().is_empty()) else {
        return enabled_services();
    };

    let all = all_services();
    let mut selected = Vec::new();

    for id in filter_str.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match all.iter().find(|s| s.id == id) {
            Some(service) => selected.push(service.clone()),
            None => log::warn!(
                "Unknown source {id:?}. Available: {}",
                all.iter()
                    .map(|s| s.id.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }

    selected
}

/// Builds the adapter for `service`, reading its credential from the
/// environment.
///
/// # Errors
///
/// Returns [`SourceError::MissingCredential`] if a required credential is
/// not set, or another [`SourceError`] if the adapter cannot be built.
pub fn build_adapter(service: &SourceService) -> Result<Box<dyn SourceAdapter>, SourceError> {
    let config = service.config();

    let credential = service
        .credential_env()
        .and_then(|var| std::env::var(var).ok())
        .filter(|value| !value.trim().is_empty());

    let required = |env_var: &str| {
        credential.clone().ok_or_else(|| SourceError::MissingCredential {
            source_id: service.id.clone(),
            env_var: env_var.to_string(),
        })
    };

    let adapter: Box<dyn SourceAdapter> = match &service.provider {
        ProviderConfig::OpenFoodFacts => Box::new(OpenFoodFactsSource::new(config)?),
        ProviderConfig::UpcItemDb { .. } => {
            Box::new(UpcItemDbSource::new(config, credential.clone())?)
        }
        ProviderConfig::GoUpc { api_key_env } => {
            Box::new(GoUpcSource::new(config, required(api_key_env)?)?)
        }
        ProviderConfig::BarcodeLookup { api_key_env } => {
            Box::new(BarcodeLookupSource::new(config, required(api_key_env)?)?)
        }
    };

    Ok(adapter)
}

/// Builds adapters for `services`, preserving their order.
///
/// Sources that cannot be built (usually a missing credential) are skipped
/// with a warning.
#[must_use]
pub fn build_chain(services: &[SourceService]) -> Vec<Box<dyn SourceAdapter>> {
    services
        .iter()
        .filter_map(|service| match build_adapter(service) {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                log::warn!("Skipping source {}: {e}", service.id);
                None
            }
        })
        .collect()
}
