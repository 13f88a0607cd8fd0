//! Ingestion and store settings.
//!
//! Both structs deserialize from TOML with every field optional:
//!
//! ```toml
//! [ingest]
//! max_line_items = 990
//! cache_namespace = "documents"
//!
//! [ingest.default_pricing]
//! entry_tax_rate = "18"
//! rounding = "nearest"
//!
//! [store]
//! database_url = "sqlite://nfe.db?mode=rwc"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::core::{IngestError, PricingConfig};

/// Upper bound on `det` entries accepted by the structural validator.
pub const DEFAULT_MAX_LINE_ITEMS: u32 = 990;

/// Layout version fully understood by the extractor.
pub const DEFAULT_SCHEMA_VERSION: &str = "4.00";

/// Literal prefix of the `infNFe@Id` attribute in front of the access key.
pub const DEFAULT_ACCESS_KEY_PREFIX: &str = "NFe";

/// Tunables for validation, extraction and fan-out.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_line_items: u32,
    pub supported_schema_version: String,
    pub access_key_prefix: String,
    /// Cache namespace; keys are `"{namespace}:{id}"`.
    pub cache_namespace: String,
    /// Pricing applied to documents ingested without explicit settings.
    pub default_pricing: PricingConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_line_items: DEFAULT_MAX_LINE_ITEMS,
            supported_schema_version: DEFAULT_SCHEMA_VERSION.to_string(),
            access_key_prefix: DEFAULT_ACCESS_KEY_PREFIX.to_string(),
            cache_namespace: "documents".to_string(),
            default_pricing: PricingConfig::default(),
        }
    }
}

/// Relational store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://nfe-ingest.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

/// Top-level settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ingest: IngestConfig,
    pub store: StoreConfig,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, IngestError> {
        toml::from_str(text).map_err(|e| IngestError::Config(e.to_string()))
    }

    /// Read and parse a settings file.
    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
