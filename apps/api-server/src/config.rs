//! Centralized configuration for api-server.
//!
//! All environment variables are loaded and validated at startup to fail fast
//! on misconfiguration rather than at request time.

use axum::http::HeaderValue;
use std::env;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_DB_PATH: &str = "data.db";
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 10;

/// Storage backend provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageProvider {
    /// In-memory storage (data lost on restart)
    Memory,
    /// SQLite file-based storage
    Sqlite,
}

impl StorageProvider {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("sqlite") {
            Self::Sqlite
        } else {
            Self::Memory
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_str(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
#[error("Configuration error for {field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields are validated at construction time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Socket address to bind (default: 0.0.0.0:8080)
    pub listen_addr: SocketAddr,
    /// Public base of generated short URLs, without trailing slash
    pub base_url: String,
    /// CORS allow origin
    pub cors_allow_origin: HeaderValue,
    /// Storage provider
    pub storage_provider: StorageProvider,
    /// SQLite database path (when using sqlite storage)
    pub db_path: PathBuf,
    /// Geo-IP endpoint template
    pub geoip_endpoint: String,
    /// Requests allowed per client IP per minute
    pub rate_limit_per_minute: NonZeroU32,
    /// Log format
    pub log_format: LogFormat,
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// Fails fast on invalid configuration.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // Listen address; a bare ":port" binds all interfaces
        let listen_raw = var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.into());
        let listen_norm = if listen_raw.starts_with(':') {
            format!("0.0.0.0{listen_raw}")
        } else {
            listen_raw.clone()
        };
        let listen_addr = listen_norm.parse().map_err(|e| ConfigError {
            field: "LISTEN_ADDR",
            message: format!("Invalid socket address '{}': {}", listen_raw, e),
        })?;

        // Base URL for short links
        let base_url = var("BASE_URL")
            .map(|v| v.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError {
                field: "BASE_URL",
                message: format!("Must start with http:// or https://, got '{}'", base_url),
            });
        }

        // CORS allow origin
        let cors_origin_str = var("CORS_ALLOW_ORIGIN").unwrap_or_else(|| "*".into());
        let cors_allow_origin = if cors_origin_str == "*" {
            HeaderValue::from_static("*")
        } else {
            HeaderValue::from_str(&cors_origin_str).map_err(|e| ConfigError {
                field: "CORS_ALLOW_ORIGIN",
                message: format!("Invalid header value '{}': {}", cors_origin_str, e),
            })?
        };

        // Storage provider
        let storage_provider =
            StorageProvider::from_str(&var("STORAGE_PROVIDER").unwrap_or_else(|| "memory".into()));

        // DB path (for sqlite)
        let db_path = PathBuf::from(var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.into()));

        // Geo-IP endpoint
        let geoip_endpoint =
            var("GEOIP_ENDPOINT").unwrap_or_else(|| geoip::DEFAULT_ENDPOINT.into());

        // Rate limit
        let rate_limit_per_minute = match var("RATE_LIMIT_PER_MINUTE") {
            None => NonZeroU32::new(DEFAULT_RATE_LIMIT_PER_MINUTE).unwrap_or(NonZeroU32::MIN),
            Some(raw) => raw.parse::<NonZeroU32>().map_err(|e| ConfigError {
                field: "RATE_LIMIT_PER_MINUTE",
                message: format!("Expected a positive integer, got '{}': {}", raw, e),
            })?,
        };

        // Log format
        let log_format = LogFormat::from_str(&var("LOG_FORMAT").unwrap_or_else(|| "pretty".into()));

        Ok(Self {
            listen_addr,
            base_url,
            cors_allow_origin,
            storage_provider,
            db_path,
            geoip_endpoint,
            rate_limit_per_minute,
            log_format,
        })
    }

    /// Log warnings about configuration that is fine for development only.
    pub fn warn_if_ephemeral(&self) {
        if self.storage_provider == StorageProvider::Memory {
            tracing::warn!(
                "STORAGE_PROVIDER=memory: links and analytics are lost on restart. \
                 Set STORAGE_PROVIDER=sqlite to persist them."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.base_url, "http://localhost:8080");
        assert_eq!(cfg.storage_provider, StorageProvider::Memory);
        assert_eq!(cfg.db_path, PathBuf::from("data.db"));
        assert_eq!(cfg.geoip_endpoint, "https://ipapi.co/%s/country/");
        assert_eq!(cfg.rate_limit_per_minute.get(), 10);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.cors_allow_origin, HeaderValue::from_static("*"));
    }

    #[test]
    fn overrides() {
        let cfg = load(&[
            ("LISTEN_ADDR", ":9090"),
            ("BASE_URL", "https://sho.rt/"),
            ("STORAGE_PROVIDER", "SQLite"),
            ("DB_PATH", "/var/lib/links/links.db"),
            ("GEOIP_ENDPOINT", "http://geo.local/lookup"),
            ("RATE_LIMIT_PER_MINUTE", "120"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:9090".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.base_url, "https://sho.rt");
        assert_eq!(cfg.storage_provider, StorageProvider::Sqlite);
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/links/links.db"));
        assert_eq!(cfg.geoip_endpoint, "http://geo.local/lookup");
        assert_eq!(cfg.rate_limit_per_minute.get(), 120);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let cfg = load(&[("BASE_URL", "   "), ("LISTEN_ADDR", "")]).unwrap();
        assert_eq!(cfg.base_url, "http://localhost:8080");
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn rejects_invalid_values() {
        let err = load(&[("LISTEN_ADDR", "nowhere")]).unwrap_err();
        assert_eq!(err.field, "LISTEN_ADDR");
        let err = load(&[("RATE_LIMIT_PER_MINUTE", "0")]).unwrap_err();
        assert_eq!(err.field, "RATE_LIMIT_PER_MINUTE");
        let err = load(&[("BASE_URL", "ftp://files")]).unwrap_err();
        assert_eq!(err.field, "BASE_URL");
    }

    #[test]
    fn storage_provider_parsing() {
        assert_eq!(StorageProvider::from_str("memory"), StorageProvider::Memory);
        assert_eq!(StorageProvider::from_str("sqlite"), StorageProvider::Sqlite);
        assert_eq!(StorageProvider::from_str("SQLITE"), StorageProvider::Sqlite);
        assert_eq!(StorageProvider::from_str("anything"), StorageProvider::Memory);
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::from_str("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("json"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_str("anything"), LogFormat::Pretty);
    }
}
