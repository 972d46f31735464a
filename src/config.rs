//! Backend configuration.
//!
//! Loaded once at startup from environment variables and treated as immutable
//! afterwards. Every backend has an enable toggle plus its connection parameters.

use std::collections::HashMap;

use serde::Serialize;

use crate::backend::BackendKind;
use crate::error::{McpError, Result};

/// PostgreSQL connection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct PostgresConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: Option<String>,
}

impl PostgresConfig {
    /// Database connected first and used when a tool call names none.
    pub fn initial_database(&self) -> &str {
        self.database.as_deref().unwrap_or("postgres")
    }
}

/// Redis connection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub db: i64,
}

/// MongoDB connection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct MongoConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: Option<String>,
}

impl MongoConfig {
    /// Connection URI. Credentials are never embedded; see [`Self::credentials`].
    pub fn uri(&self) -> String {
        format!("mongodb://{}:{}", self.host, self.port)
    }

    /// User and password, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}

/// InfluxDB 2.x connection parameters.
#[derive(Debug, Clone, Serialize)]
pub struct InfluxConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub org: Option<String>,
    pub bucket: Option<String>,
}

impl InfluxConfig {
    /// Base URL of the HTTP API.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Configuration for all backends.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub mongodb: MongoConfig,
    pub influxdb: InfluxConfig,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a fixed set of key/value pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Result<Self> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_lookup(|key| map.get(key).cloned())
    }

    /// Load configuration through an arbitrary lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        Ok(Self {
            postgres: PostgresConfig {
                enabled: env.flag("ENABLE_POSTGRES")?,
                host: env.string_or("POSTGRES_HOST", "localhost"),
                port: env.port("POSTGRES_PORT", 5432)?,
                user: env.string_or("POSTGRES_USER", "postgres"),
                password: env.string("POSTGRES_PASSWORD"),
                database: env.string("POSTGRES_DB"),
            },
            redis: RedisConfig {
                enabled: env.flag("ENABLE_REDIS")?,
                host: env.string_or("REDIS_HOST", "localhost"),
                port: env.port("REDIS_PORT", 6379)?,
                password: env.string("REDIS_PASSWORD"),
                db: env.integer("REDIS_DB", 0)?,
            },
            mongodb: MongoConfig {
                enabled: env.flag("ENABLE_MONGODB")?,
                host: env.string_or("MONGODB_HOST", "localhost"),
                port: env.port("MONGODB_PORT", 27017)?,
                user: env.string("MONGODB_USER"),
                password: env.string("MONGODB_PASSWORD"),
                database: env.string("MONGODB_DB"),
            },
            influxdb: InfluxConfig {
                enabled: env.flag("ENABLE_INFLUXDB")?,
                host: env.string_or("INFLUXDB_HOST", "localhost"),
                port: env.port("INFLUXDB_PORT", 8086)?,
                token: env.string("INFLUXDB_TOKEN"),
                org: env.string("INFLUXDB_ORG"),
                bucket: env.string("INFLUXDB_BUCKET"),
            },
        })
    }

    /// Whether the backend is switched on.
    pub fn is_enabled(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Relational => self.postgres.enabled,
            BackendKind::KeyValue => self.redis.enabled,
            BackendKind::Document => self.mongodb.enabled,
            BackendKind::TimeSeries => self.influxdb.enabled,
        }
    }

    /// Whether the connection parameters the backend needs are present.
    pub fn is_configured(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Relational => !self.postgres.host.is_empty(),
            BackendKind::KeyValue => !self.redis.host.is_empty(),
            BackendKind::Document => !self.mongodb.host.is_empty(),
            BackendKind::TimeSeries => {
                !self.influxdb.host.is_empty()
                    && self.influxdb.token.is_some()
                    && self.influxdb.org.is_some()
            }
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value, `None` when unset or empty.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim_matches(|c| matches!(c, ' ' | '"' | '\r' | '\n')).to_string())
            .filter(|v| !v.is_empty())
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.string(key).unwrap_or_else(|| default.to_string())
    }

    fn flag(&self, key: &str) -> Result<bool> {
        match self.string(key) {
            None => Ok(true),
            Some(v) => match v.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(McpError::Config(format!("{} must be a boolean, got '{}'", key, v))),
            },
        }
    }

    fn port(&self, key: &str, default: u16) -> Result<u16> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| McpError::Config(format!("{} must be a port number, got '{}'", key, v))),
        }
    }

    fn integer(&self, key: &str, default: i64) -> Result<i64> {
        match self.string(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| McpError::Config(format!("{} must be an integer, got '{}'", key, v))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_pairs(&[]).unwrap();
        assert!(config.postgres.enabled);
        assert_eq!(config.postgres.port, 5432);
        assert_eq!(config.postgres.initial_database(), "postgres");
        assert_eq!(config.redis.db, 0);
        assert_eq!(config.mongodb.uri(), "mongodb://localhost:27017");
        assert_eq!(config.influxdb.url(), "http://localhost:8086");
    }

    #[test]
    fn test_values_are_trimmed() {
        let config = AppConfig::from_pairs(&[
            ("POSTGRES_HOST", " \"db.internal\"\r\n"),
            ("POSTGRES_PASSWORD", "\"\""),
        ])
        .unwrap();
        assert_eq!(config.postgres.host, "db.internal");
        assert_eq!(config.postgres.password, None);
    }

    #[test]
    fn test_enable_flags() {
        let config = AppConfig::from_pairs(&[
            ("ENABLE_POSTGRES", "off"),
            ("ENABLE_REDIS", "YES"),
            ("ENABLE_MONGODB", "0"),
        ])
        .unwrap();
        assert!(!config.is_enabled(BackendKind::Relational));
        assert!(config.is_enabled(BackendKind::KeyValue));
        assert!(!config.is_enabled(BackendKind::Document));
        assert!(config.is_enabled(BackendKind::TimeSeries));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = AppConfig::from_pairs(&[("REDIS_PORT", "sixty")]).unwrap_err();
        assert!(matches!(err, McpError::Config(_)));

        let err = AppConfig::from_pairs(&[("ENABLE_MONGODB", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("ENABLE_MONGODB"));
    }

    #[test]
    fn test_influx_needs_token_and_org() {
        let config = AppConfig::from_pairs(&[("INFLUXDB_TOKEN", "t")]).unwrap();
        assert!(!config.is_configured(BackendKind::TimeSeries));

        let config =
            AppConfig::from_pairs(&[("INFLUXDB_TOKEN", "t"), ("INFLUXDB_ORG", "acme")]).unwrap();
        assert!(config.is_configured(BackendKind::TimeSeries));
    }

    #[test]
    fn test_mongo_credentials_stay_out_of_uri() {
        let config = AppConfig::from_pairs(&[
            ("MONGODB_USER", "app"),
            ("MONGODB_PASSWORD", "p@ss:w/rd%"),
            ("MONGODB_HOST", "mongo"),
        ])
        .unwrap();
        assert_eq!(config.mongodb.uri(), "mongodb://mongo:27017");
        assert_eq!(config.mongodb.credentials(), Some(("app", "p@ss:w/rd%")));

        let config = AppConfig::from_pairs(&[("MONGODB_USER", "app")]).unwrap();
        assert_eq!(config.mongodb.credentials(), None);
    }
}
