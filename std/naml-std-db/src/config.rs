///
/// # Runtime Configuration
///
/// `DbConfig` is read once per process and shared by every session through
/// `DbRuntime`. All sections and keys are optional; missing values take the
/// defaults shown below.
///
/// ```toml
/// [metadata]
/// capacity = 256       # table metadata entries kept (LRU)
/// max_age_ms = 5000    # entries older than this are rebuilt on lookup
///
/// [connection]
/// catalog_reconnect = false   # reconnect instead of switching catalog on unused connections
/// unicode_semantics = true    # decode character columns with the connection encoding
/// encoding = "utf-8"          # default connection text encoding
/// ```
///

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    pub metadata: MetadataConfig,
    pub connection: ConnectionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub capacity: u64,
    pub max_age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub catalog_reconnect: bool,
    pub unicode_semantics: bool,
    pub encoding: String,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_age_ms: 5000,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            catalog_reconnect: false,
            unicode_semantics: true,
            encoding: "utf-8".to_string(),
        }
    }
}

impl MetadataConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl DbConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DbConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.metadata.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "metadata.capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if TextEncoding::from_label(&self.connection.encoding).is_none() {
            return Err(ConfigError::InvalidValue {
                key: "connection.encoding",
                reason: format!("unsupported encoding '{}'", self.connection.encoding),
            });
        }
        Ok(())
    }

    pub fn default_encoding(&self) -> TextEncoding {
        TextEncoding::from_label(&self.connection.encoding).unwrap_or(TextEncoding::Utf8)
    }
}

/// Text encodings the core can decode character columns with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    /// ISO-8859-1: every byte is the code point of the same value.
    Latin1,
}

impl TextEncoding {
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" | "utf8mb4" | "unicode" => Some(TextEncoding::Utf8),
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" | "iso_8859-1" => {
                Some(TextEncoding::Latin1)
            }
            _ => None,
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        }
    }
}
