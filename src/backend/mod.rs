//! Driver adapters.
//!
//! Each backend kind is reached through a trait so the session registry and the
//! tools never depend on a concrete driver. [`DriverConnector`] builds the real
//! clients; tests substitute in-memory fakes.

pub mod influx;
pub mod mongo;
pub mod postgres;
pub mod redisdb;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::config::{InfluxConfig, MongoConfig, PostgresConfig, RedisConfig};
use crate::error::Result;

/// The four supported backend categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Relational,
    KeyValue,
    Document,
    TimeSeries,
}

impl BackendKind {
    /// All kinds, in session initialization order.
    pub const ALL: [BackendKind; 4] = [
        BackendKind::Relational,
        BackendKind::KeyValue,
        BackendKind::Document,
        BackendKind::TimeSeries,
    ];

    /// Product name used in tool names, URIs and messages.
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Relational => "postgres",
            BackendKind::KeyValue => "redis",
            BackendKind::Document => "mongodb",
            BackendKind::TimeSeries => "influxdb",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server address and role a relational client is connected with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// PostgreSQL client.
#[async_trait]
pub trait RelationalClient: Send + Sync {
    /// Database used when a call does not name one.
    fn default_database(&self) -> &str;

    /// Databases connected when the client was created.
    fn databases(&self) -> Vec<String>;

    fn endpoint(&self) -> Endpoint;

    /// Run a row-returning statement; each row becomes a JSON object.
    async fn query(&self, database: &str, sql: &str) -> Result<Vec<JsonValue>>;

    /// Run a statement and return the affected row count.
    async fn execute(&self, database: &str, sql: &str) -> Result<u64>;

    /// Tables in the `public` schema.
    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;

    /// Column descriptions for one table.
    async fn table_info(&self, database: &str, table: &str) -> Result<Vec<JsonValue>>;

    async fn close(&self) -> Result<()>;
}

/// Redis client.
#[async_trait]
pub trait KeyValueClient: Send + Sync {
    /// Logical database selected at connect time.
    fn default_db(&self) -> i64;

    /// Run one command (`args[0]` is the command name) against `db`.
    async fn command(&self, db: i64, args: &[String]) -> Result<JsonValue>;

    async fn close(&self) -> Result<()>;
}

/// Counts reported by a multi-document update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateCounts {
    pub matched: u64,
    pub modified: u64,
}

/// MongoDB client. Documents cross this boundary as relaxed extended JSON.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: JsonValue,
        limit: i64,
    ) -> Result<Vec<JsonValue>>;

    /// Insert one document and return its `_id`.
    async fn insert_one(&self, database: &str, collection: &str, document: JsonValue)
        -> Result<JsonValue>;

    async fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: JsonValue,
        update: JsonValue,
    ) -> Result<UpdateCounts>;

    async fn delete_many(&self, database: &str, collection: &str, filter: JsonValue)
        -> Result<u64>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<JsonValue>,
    ) -> Result<Vec<JsonValue>>;

    async fn create_collection(&self, database: &str, collection: &str) -> Result<()>;

    async fn list_databases(&self) -> Result<Vec<String>>;

    async fn list_collections(&self, database: &str) -> Result<Vec<String>>;

    /// Output of the `buildInfo` command.
    async fn server_info(&self) -> Result<JsonValue>;

    /// Size and object counts from `dbStats`.
    async fn database_stats(&self, database: &str) -> Result<JsonValue>;

    /// Size and count figures from `collStats` plus the index names.
    async fn collection_stats(&self, database: &str, collection: &str) -> Result<JsonValue>;

    async fn close(&self) -> Result<()>;
}

/// InfluxDB client.
#[async_trait]
pub trait TimeSeriesClient: Send + Sync {
    /// Run a Flux query; each CSV record becomes a JSON object.
    async fn query(&self, flux: &str) -> Result<Vec<JsonValue>>;

    /// Write line protocol into a bucket.
    async fn write(&self, bucket: &str, lines: &str) -> Result<()>;

    async fn list_buckets(&self) -> Result<Vec<JsonValue>>;

    /// Create a bucket; `retention_secs` of zero keeps data forever.
    async fn create_bucket(&self, name: &str, retention_secs: u64) -> Result<JsonValue>;

    async fn delete(&self, bucket: &str, start: &str, stop: &str, predicate: &str) -> Result<()>;

    async fn health(&self) -> Result<JsonValue>;

    /// The HTTP client holds no server-side state, so releasing it is a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Builds connected clients from configuration.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_relational(&self, config: &PostgresConfig) -> Result<Arc<dyn RelationalClient>>;

    async fn connect_key_value(&self, config: &RedisConfig) -> Result<Arc<dyn KeyValueClient>>;

    async fn connect_document(&self, config: &MongoConfig) -> Result<Arc<dyn DocumentClient>>;

    async fn connect_time_series(&self, config: &InfluxConfig) -> Result<Arc<dyn TimeSeriesClient>>;
}

/// Connector backed by the real database drivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect_relational(&self, config: &PostgresConfig) -> Result<Arc<dyn RelationalClient>> {
        Ok(Arc::new(postgres::PostgresClient::connect(config).await?))
    }

    async fn connect_key_value(&self, config: &RedisConfig) -> Result<Arc<dyn KeyValueClient>> {
        Ok(Arc::new(redisdb::RedisClient::connect(config).await?))
    }

    async fn connect_document(&self, config: &MongoConfig) -> Result<Arc<dyn DocumentClient>> {
        Ok(Arc::new(mongo::MongoClient::connect(config).await?))
    }

    async fn connect_time_series(&self, config: &InfluxConfig) -> Result<Arc<dyn TimeSeriesClient>> {
        Ok(Arc::new(influx::InfluxClient::connect(config).await?))
    }
}
