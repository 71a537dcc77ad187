//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::identity::Level;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Governance settings
#[derive(Debug, Clone)]
pub struct TribunalConfig {
    /// Directory for JSON proposal records; `None` keeps everything in memory
    pub data_dir: Option<PathBuf>,
    /// Lowest level that may review
    pub reviewer_level: Level,
    pub allow_self_vote: bool,
}

impl Default for TribunalConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            reviewer_level: Level::MAESTRO,
            allow_self_vote: true,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub tribunal: TribunalConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: var("HOST")
                .and_then(|h| h.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().host),
            port: var("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| ServerConfig::default().port),
        };

        let cors = CorsConfig {
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let reviewer_level = match var("TRIBUNAL_REVIEWER_LEVEL") {
            Some(raw) => raw
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(|l| Level::new(l).ok())
                .ok_or_else(|| {
                    ConfigError::InvalidValue(format!(
                        "TRIBUNAL_REVIEWER_LEVEL must be 1-6, got '{}'",
                        raw
                    ))
                })?,
            None => TribunalConfig::default().reviewer_level,
        };

        let allow_self_vote = match var("TRIBUNAL_ALLOW_SELF_VOTE") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!(
                    "TRIBUNAL_ALLOW_SELF_VOTE must be true or false, got '{}'",
                    raw
                ))
            })?,
            None => TribunalConfig::default().allow_self_vote,
        };

        let tribunal = TribunalConfig {
            data_dir: var("TRIBUNAL_DATA_DIR")
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
            reviewer_level,
            allow_self_vote,
        };

        Ok(Self { server, cors, tribunal })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_defaults_when_unset() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.tribunal.reviewer_level, Level::MAESTRO);
        assert!(s.tribunal.allow_self_vote);
        assert!(s.tribunal.data_dir.is_none());
        assert_eq!(s.cors.allowed_origins, vec!["http://localhost:3001".to_string()]);
    }

    #[test]
    fn test_tribunal_overrides() {
        let s = settings(&[
            ("PORT", "8080"),
            ("TRIBUNAL_REVIEWER_LEVEL", "5"),
            ("TRIBUNAL_ALLOW_SELF_VOTE", "no"),
            ("TRIBUNAL_DATA_DIR", "/var/lib/tribunal"),
            ("ALLOWED_ORIGINS", "https://a.test, https://b.test"),
        ])
        .unwrap();
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.tribunal.reviewer_level, Level::new(5).unwrap());
        assert!(!s.tribunal.allow_self_vote);
        assert_eq!(s.tribunal.data_dir, Some(PathBuf::from("/var/lib/tribunal")));
        assert_eq!(s.cors.allowed_origins.len(), 2);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(settings(&[("TRIBUNAL_REVIEWER_LEVEL", "9")]).is_err());
        assert!(settings(&[("TRIBUNAL_ALLOW_SELF_VOTE", "maybe")]).is_err());
    }
}
