//! PostgreSQL adapter built on `sqlx`.
//!
//! Connects the configured database first, then every other non-template
//! database on the server. Databases that refuse the connection are skipped.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Executor, Row, TypeInfo};

use super::{Endpoint, RelationalClient};
use crate::config::PostgresConfig;
use crate::error::{McpError, Result};

const APPLICATION_NAME: &str = "polydb-mcp";
const MAX_CONNECTIONS: u32 = 5;

/// Connection pools keyed by database name.
pub struct PostgresClient {
    endpoint: Endpoint,
    default_database: String,
    pools: BTreeMap<String, PgPool>,
}

impl PostgresClient {
    /// Connect to the initial database and discover the rest of the server.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let initial = config.initial_database().to_string();
        tracing::info!(
            "Connecting to PostgreSQL at {}:{} (database '{}')",
            config.host,
            config.port,
            initial
        );

        let pool = open_pool(config, &initial).await?;
        let mut pools = BTreeMap::new();

        let others: Vec<String> = sqlx::query_scalar(
            "SELECT datname::text FROM pg_database WHERE datistemplate = false ORDER BY datname",
        )
        .fetch_all(&pool)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Could not list PostgreSQL databases from server: {}", e);
            Vec::new()
        });
        pools.insert(initial.clone(), pool);

        for name in others.into_iter().filter(|name| *name != initial) {
            match open_pool(config, &name).await {
                Ok(pool) => {
                    pools.insert(name, pool);
                }
                Err(e) => {
                    tracing::warn!("Could not connect to PostgreSQL database '{}': {}", name, e)
                }
            }
        }

        Ok(Self {
            endpoint: Endpoint {
                host: config.host.clone(),
                port: config.port,
                user: config.user.clone(),
            },
            default_database: initial,
            pools,
        })
    }

    fn pool(&self, database: &str) -> Result<&PgPool> {
        self.pools.get(database).ok_or_else(|| {
            McpError::invalid_arg(
                "database",
                format!(
                    "database '{}' not connected. Available: {}",
                    database,
                    self.databases().join(", ")
                ),
            )
        })
    }
}

async fn open_pool(config: &PostgresConfig, database: &str) -> Result<PgPool> {
    let mut options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(database)
        .application_name(APPLICATION_NAME);
    if let Some(password) = &config.password {
        options = options.password(password);
    }

    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Render one row as a JSON object keyed by column name.
///
/// Statements run over the simple query protocol, so every value arrives in
/// text format and is mapped by its column type.
fn row_to_json(row: &PgRow) -> JsonValue {
    let mut object = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_unchecked::<Option<String>, _>(i).unwrap_or_else(|e| {
            tracing::debug!("Column '{}' is not text-decodable: {}", column.name(), e);
            None
        });
        object.insert(column.name().to_string(), text_to_json(column.type_info().name(), raw));
    }
    JsonValue::Object(object)
}

/// Map a text-format value of the named Postgres type to JSON.
///
/// Integers, finite floats, booleans and JSON documents keep their JSON type.
/// NUMERIC and everything else stay strings so no precision is lost.
fn text_to_json(type_name: &str, raw: Option<String>) -> JsonValue {
    let Some(text) = raw else {
        return JsonValue::Null;
    };
    match type_name {
        "BOOL" => match text.as_str() {
            "t" => JsonValue::Bool(true),
            "f" => JsonValue::Bool(false),
            _ => JsonValue::String(text),
        },
        "INT2" | "INT4" | "INT8" | "OID" => text
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::String(text)),
        "FLOAT4" | "FLOAT8" => match text.parse::<f64>() {
            Ok(f) if f.is_finite() => JsonValue::from(f),
            _ => JsonValue::String(text),
        },
        "JSON" | "JSONB" => serde_json::from_str(&text).unwrap_or(JsonValue::String(text)),
        _ => JsonValue::String(text),
    }
}

fn into_rows(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(rows) => rows,
        JsonValue::Null => Vec::new(),
        other => vec![other],
    }
}

#[async_trait]
impl RelationalClient for PostgresClient {
    fn default_database(&self) -> &str {
        &self.default_database
    }

    fn databases(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn query(&self, database: &str, sql: &str) -> Result<Vec<JsonValue>> {
        let pool = self.pool(database)?;
        // The statement is sent unchanged, so RETURNING, SHOW and trailing
        // comments behave exactly as in psql.
        let rows = pool.fetch_all(sql).await.map_err(|e| {
            tracing::error!("Query failed on '{}': {}", database, e);
            McpError::from(e)
        })?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn execute(&self, database: &str, sql: &str) -> Result<u64> {
        let pool = self.pool(database)?;
        // Plain text statements go over the simple query protocol, which also
        // accepts utility commands such as CREATE DATABASE.
        let result = pool.execute(sql).await.map_err(|e| {
            tracing::error!("Execute failed on '{}': {}", database, e);
            McpError::from(e)
        })?;
        tracing::info!("Statement executed on '{}': {} row(s)", database, result.rows_affected());
        Ok(result.rows_affected())
    }

    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let pool = self.pool(database)?;
        let tables = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = 'public' ORDER BY table_name",
        )
        .fetch_all(pool)
        .await?;
        Ok(tables)
    }

    async fn table_info(&self, database: &str, table: &str) -> Result<Vec<JsonValue>> {
        let pool = self.pool(database)?;
        let columns: JsonValue = sqlx::query_scalar(
            "SELECT COALESCE(json_agg(c), '[]'::json) FROM ( \
                 SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_name = $1 \
                 ORDER BY ordinal_position \
             ) AS c",
        )
        .bind(table)
        .fetch_one(pool)
        .await?;
        Ok(into_rows(columns))
    }

    async fn close(&self) -> Result<()> {
        for (name, pool) in &self.pools {
            pool.close().await;
            tracing::info!("PostgreSQL pool closed for '{}'", name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_to_json_scalars() {
        assert_eq!(text_to_json("INT4", None), JsonValue::Null);
        assert_eq!(text_to_json("INT8", Some("42".into())), json!(42));
        assert_eq!(text_to_json("OID", Some("16384".into())), json!(16384));
        assert_eq!(text_to_json("BOOL", Some("t".into())), json!(true));
        assert_eq!(text_to_json("BOOL", Some("f".into())), json!(false));
        assert_eq!(text_to_json("FLOAT8", Some("1.5".into())), json!(1.5));
        assert_eq!(text_to_json("FLOAT8", Some("NaN".into())), json!("NaN"));
        assert_eq!(text_to_json("TEXT", Some("16.2".into())), json!("16.2"));
    }

    #[test]
    fn test_text_to_json_keeps_numeric_precision() {
        assert_eq!(
            text_to_json("NUMERIC", Some("12345678901234567890.123".into())),
            json!("12345678901234567890.123")
        );
    }

    #[test]
    fn test_text_to_json_parses_json_columns() {
        assert_eq!(
            text_to_json("JSONB", Some(r#"{"a": [1, 2]}"#.into())),
            json!({"a": [1, 2]})
        );
        assert_eq!(text_to_json("JSON", Some("not json".into())), json!("not json"));
    }

    #[test]
    fn test_into_rows() {
        assert!(into_rows(JsonValue::Null).is_empty());
        assert_eq!(into_rows(json!([{"a": 1}])).len(), 1);
    }

    /// Connects using the POSTGRES_* variables when POLYDB_LIVE_POSTGRES is set.
    async fn live_client() -> Option<PostgresClient> {
        std::env::var("POLYDB_LIVE_POSTGRES").ok()?;
        let config = crate::config::AppConfig::from_env().ok()?;
        PostgresClient::connect(&config.postgres).await.ok()
    }

    #[tokio::test]
    async fn test_live_query_runs_statement_unchanged() {
        let Some(client) = live_client().await else {
            return;
        };
        let db = client.default_database().to_string();

        let rows = client
            .query(&db, "SELECT 1 AS one, 'x'::text AS s -- trailing comment")
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"one": 1, "s": "x"})]);

        let rows = client.query(&db, "SHOW server_version").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0]["server_version"].is_string());

        let rows = client
            .query(
                &db,
                "CREATE TEMP TABLE polydb_returning (id serial, a int); \
                 INSERT INTO polydb_returning (a) VALUES (7) RETURNING id, a",
            )
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": 1, "a": 7})]);

        client.close().await.unwrap();
    }
}
