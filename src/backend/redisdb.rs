//! Redis adapter built on the `redis` crate's multiplexed tokio connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Value};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use super::KeyValueClient;
use crate::config::RedisConfig;
use crate::convert::check_redis_command;
use crate::error::{McpError, Result};

/// A connection to the configured logical database.
///
/// Commands aimed at another logical database open a short-lived connection
/// to it so the shared connection never has its database switched.
pub struct RedisClient {
    host: String,
    port: u16,
    password: Option<String>,
    db: i64,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisClient {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        tracing::info!("Connecting to Redis at {}:{}", config.host, config.port);

        let client = Self {
            host: config.host.clone(),
            port: config.port,
            password: config.password.clone(),
            db: config.db,
            connection: Mutex::new(None),
        };
        let mut connection = client.open(config.db).await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to Redis: {}", e);
                McpError::from(e)
            })?;
        *client.connection.lock().await = Some(connection);

        Ok(client)
    }

    async fn open(&self, db: i64) -> Result<MultiplexedConnection> {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db,
                password: self.password.clone(),
                ..Default::default()
            },
        };
        let client = Client::open(info)?;
        Ok(client.get_multiplexed_async_connection().await?)
    }

    async fn shared(&self) -> Result<MultiplexedConnection> {
        self.connection
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::NotConnected("redis".to_string()))
    }
}

/// Render a reply as JSON. Binary payloads are decoded lossily as UTF-8.
pub fn value_to_json(value: Value) -> JsonValue {
    match value {
        Value::Nil => JsonValue::Null,
        Value::Int(n) => JsonValue::from(n),
        Value::Data(bytes) => JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        Value::Bulk(items) => JsonValue::Array(items.into_iter().map(value_to_json).collect()),
        Value::Status(status) => JsonValue::String(status),
        Value::Okay => JsonValue::String("OK".to_string()),
    }
}

#[async_trait]
impl KeyValueClient for RedisClient {
    fn default_db(&self) -> i64 {
        self.db
    }

    async fn command(&self, db: i64, args: &[String]) -> Result<JsonValue> {
        let (name, rest) = args
            .split_first()
            .ok_or_else(|| McpError::MissingArg("command".to_string()))?;
        check_redis_command(name)?;

        let mut cmd = redis::cmd(name);
        for arg in rest {
            cmd.arg(arg);
        }

        let mut connection = if db == self.db {
            self.shared().await?
        } else {
            self.open(db).await?
        };
        let reply: Value = cmd.query_async(&mut connection).await?;
        Ok(value_to_json(reply))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the last handle shuts the multiplexed connection down.
        if self.connection.lock().await.take().is_some() {
            tracing::info!("Redis connection closed for {}:{}", self.host, self.port);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_to_json() {
        assert_eq!(value_to_json(Value::Nil), JsonValue::Null);
        assert_eq!(value_to_json(Value::Okay), serde_json::json!("OK"));
        assert_eq!(
            value_to_json(Value::Bulk(vec![Value::Data(b"a".to_vec()), Value::Int(2)])),
            serde_json::json!(["a", 2])
        );
    }
}
