//! Registry configuration.
//!
//! [`PubSubConfig`] names the default connection and maps connection names
//! to driver-specific [`ConnectionConfig`] records. Records are open
//! key/value maps: the registry only reads `driver`, everything else is
//! interpreted by the adapter that the driver selects.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{PubSubError, Result};

/// Connection name used when nothing else is configured.
pub const FALLBACK_CONNECTION: &str = "redis";

/// Driver-specific configuration for a single named connection.
///
/// # Example
///
/// ```
/// use pubsub_registry::ConnectionConfig;
///
/// let config = ConnectionConfig::new()
///     .with("driver", "redis")
///     .with("host", "localhost")
///     .with("port", 6379);
///
/// assert_eq!(config.driver(), Some("redis"));
/// assert_eq!(config.get_u64("port", "redis").unwrap(), Some(6379));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionConfig(Map<String, Value>);

impl ConnectionConfig {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Set a field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Raw field access.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// True if the record has a `key` entry, whatever its value.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The `driver` field, when it is present and a string.
    pub fn driver(&self) -> Option<&str> {
        self.0.get("driver").and_then(Value::as_str)
    }

    /// String field. `null` counts as absent.
    pub fn get_str(&self, key: &str, driver: &'static str) -> Result<Option<&str>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(PubSubError::invalid_config(
                driver,
                format!("`{key}` must be a string, got {other}"),
            )),
        }
    }

    /// Boolean field. `null` counts as absent.
    pub fn get_bool(&self, key: &str, driver: &'static str) -> Result<Option<bool>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(PubSubError::invalid_config(
                driver,
                format!("`{key}` must be a boolean, got {other}"),
            )),
        }
    }

    /// Unsigned integer field.
    ///
    /// Numeric strings are accepted since environment-sourced values
    /// (e.g. a port) arrive as text.
    pub fn get_u64(&self, key: &str, driver: &'static str) -> Result<Option<u64>> {
        let invalid = |v: &Value| {
            PubSubError::invalid_config(
                driver,
                format!("`{key}` must be a non-negative integer, got {v}"),
            )
        };
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => n.as_u64().map(Some).ok_or_else(|| invalid(value)),
            Value::String(s) => s.trim().parse().map(Some).map_err(|_| invalid(value)),
            _ => Err(invalid(value)),
        }
    }

    /// Nested record field, e.g. the subscribe-side config of the HTTP bridge.
    pub fn get_object(&self, key: &str, driver: &'static str) -> Result<Option<ConnectionConfig>> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(ConnectionConfig::from(map.clone()))),
            Some(other) => Err(PubSubError::invalid_config(
                driver,
                format!("`{key}` must be an object, got {other}"),
            )),
        }
    }
}

impl From<Map<String, Value>> for ConnectionConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Overall registry configuration.
///
/// # Example
///
/// ```
/// use pubsub_registry::{ConnectionConfig, PubSubConfig};
///
/// let config = PubSubConfig::new("local")
///     .with_connection("local", ConnectionConfig::new().with("driver", "local"))
///     .with_connection("/dev/null", ConnectionConfig::new().with("driver", "/dev/null"));
///
/// assert_eq!(config.default, "local");
/// assert!(config.connections.contains_key("/dev/null"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PubSubConfig {
    /// Connection name used when `connection(None)` is requested.
    #[serde(default)]
    pub default: String,

    /// Named connection configs.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionConfig>,
}

impl PubSubConfig {
    /// Create a config with a default name and no connections.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            connections: HashMap::new(),
        }
    }

    /// Add or replace a named connection.
    pub fn with_connection(mut self, name: impl Into<String>, config: ConnectionConfig) -> Self {
        self.connections.insert(name.into(), config);
        self
    }

    /// Build the shipped default configuration from the process environment.
    ///
    /// | variable | used for | fallback |
    /// |---|---|---|
    /// | `PUBSUB_CONNECTION` | default connection name | `redis` |
    /// | `REDIS_HOST` / `REDIS_PORT` | redis host and port | `localhost` / `6379` |
    /// | `GOOGLE_CLOUD_PROJECT_ID` | gcloud project | unset |
    /// | `GOOGLE_APPLICATION_CREDENTIALS` | gcloud key file | unset |
    /// | `HTTP_PUBSUB_URI` | http bridge target | unset |
    /// | `HTTP_PUBSUB_SUBSCRIBE_CONNECTION` | http bridge subscribe driver | `redis` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let opt = |key: &str| var(key).map(Value::String).unwrap_or(Value::Null);

        let port = var("REDIS_PORT")
            .and_then(|p| p.parse::<u64>().ok())
            .unwrap_or(6379);

        Self::new(var("PUBSUB_CONNECTION").unwrap_or_else(|| FALLBACK_CONNECTION.into()))
            .with_connection(
                "/dev/null",
                ConnectionConfig::new().with("driver", "/dev/null"),
            )
            .with_connection("local", ConnectionConfig::new().with("driver", "local"))
            .with_connection(
                "redis",
                ConnectionConfig::new()
                    .with("driver", "redis")
                    .with("host", var("REDIS_HOST").unwrap_or_else(|| "localhost".into()))
                    .with("port", port)
                    .with("db", 0),
            )
            .with_connection(
                "gcloud",
                ConnectionConfig::new()
                    .with("driver", "gcloud")
                    .with("project_id", opt("GOOGLE_CLOUD_PROJECT_ID"))
                    .with("key_file", opt("GOOGLE_APPLICATION_CREDENTIALS"))
                    .with("client_identifier", Value::Null)
                    .with("auto_create_topics", true)
                    .with("auto_create_subscriptions", true),
            )
            .with_connection(
                "http",
                ConnectionConfig::new()
                    .with("driver", "http")
                    .with("uri", opt("HTTP_PUBSUB_URI"))
                    .with(
                        "subscribe_connection_config",
                        ConnectionConfig::new().with(
                            "driver",
                            var("HTTP_PUBSUB_SUBSCRIBE_CONNECTION")
                                .unwrap_or_else(|| FALLBACK_CONNECTION.into()),
                        ),
                    ),
            )
    }
}

impl From<ConnectionConfig> for Value {
    fn from(config: ConnectionConfig) -> Self {
        Value::Object(config.0)
    }
}
