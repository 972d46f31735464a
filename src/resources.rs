//! Read-only resources.
//!
//! Each resource is a URI that renders a JSON document. Fixed URIs are listed
//! by `resources/list`; parameterized ones (a database, table, key, collection
//! or measurement in the path) are listed by `resources/templates/list`.
//! Backend failures are rendered into the document as `{"error": ...}` rather
//! than failing the read.

use serde::Serialize;
use serde_json::{json, Value as JsonValue};

use crate::backend::BackendKind;
use crate::config::AppConfig;
use crate::error::{McpError, Result};
use crate::session::{Session, SessionRegistry};
use crate::tools::{influxdb, mongodb, postgres, redis};

/// MIME type of every resource document.
pub const MIME_TYPE: &str = "application/json";

/// Rows returned by the table sample resource.
const TABLE_SAMPLE_LIMIT: u32 = 10;

/// A resource definition for the MCP resources/list response.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDef {
    pub uri: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl ResourceDef {
    fn new(uri: &str, name: &str, description: &str) -> Self {
        Self {
            uri: uri.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            mime_type: MIME_TYPE.to_string(),
        }
    }
}

/// An RFC 6570 URI template for the MCP resources/templates/list response.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceTemplate {
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

impl ResourceTemplate {
    fn new(uri_template: &str, name: &str, description: &str) -> Self {
        Self {
            uri_template: uri_template.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            mime_type: MIME_TYPE.to_string(),
        }
    }
}

/// A parsed parameterized URI.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    PgTables { database: String },
    PgTableSchema { database: String, table: String },
    PgTableSample { database: String, table: String },
    RedisKeys { db: i64 },
    RedisKeyInfo { db: i64, key: String },
    RedisKeyValue { db: i64, key: String },
    MongoDatabaseInfo { database: String },
    MongoCollections { database: String },
    MongoCollectionInfo { database: String, collection: String },
    MongoCollectionSchema { database: String, collection: String },
    MongoCollectionSample { database: String, collection: String },
    InfluxMeasurements { bucket: String },
    InfluxFields { bucket: String, measurement: String },
    InfluxTags { bucket: String, measurement: String },
    InfluxTagValues { bucket: String, measurement: String, tag_key: String },
    InfluxSample { bucket: String, measurement: String },
}

/// Path segments, or `None` when any segment is empty.
fn segments(path: &str) -> Option<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        None
    } else {
        Some(parts)
    }
}

impl Target {
    fn parse(uri: &str) -> Option<Self> {
        let (scheme, path) = uri.split_once("://")?;
        match scheme {
            "postgres" => Self::parse_postgres(path),
            "redis" => Self::parse_redis(path),
            "mongodb" => Self::parse_mongodb(path),
            "influxdb" => Self::parse_influxdb(path),
            _ => None,
        }
    }

    fn parse_postgres(path: &str) -> Option<Self> {
        let target = match segments(path)?.as_slice() {
            ["databases", db, "tables"] => Target::PgTables {
                database: db.to_string(),
            },
            ["databases", db, "tables", table, "schema"] => Target::PgTableSchema {
                database: db.to_string(),
                table: table.to_string(),
            },
            ["databases", db, "tables", table, "sample"] => Target::PgTableSample {
                database: db.to_string(),
                table: table.to_string(),
            },
            _ => return None,
        };
        Some(target)
    }

    /// Keys may contain `/`, so the suffix decides what is read.
    fn parse_redis(path: &str) -> Option<Self> {
        let (db, rest) = path.strip_prefix("databases/")?.split_once('/')?;
        let db = db.parse::<i64>().ok().filter(|db| *db >= 0)?;
        if rest == "keys" {
            return Some(Target::RedisKeys { db });
        }

        let key_path = rest.strip_prefix("keys/")?;
        if let Some(key) = key_path.strip_suffix("/info").filter(|k| !k.is_empty()) {
            Some(Target::RedisKeyInfo { db, key: key.to_string() })
        } else if let Some(key) = key_path.strip_suffix("/value").filter(|k| !k.is_empty()) {
            Some(Target::RedisKeyValue { db, key: key.to_string() })
        } else {
            None
        }
    }

    fn parse_mongodb(path: &str) -> Option<Self> {
        let target = match segments(path)?.as_slice() {
            ["databases", db, "info"] => Target::MongoDatabaseInfo {
                database: db.to_string(),
            },
            ["databases", db, "collections"] => Target::MongoCollections {
                database: db.to_string(),
            },
            ["databases", db, "collections", coll, leaf] => {
                let (database, collection) = (db.to_string(), coll.to_string());
                match *leaf {
                    "info" => Target::MongoCollectionInfo { database, collection },
                    "schema" => Target::MongoCollectionSchema { database, collection },
                    "sample" => Target::MongoCollectionSample { database, collection },
                    _ => return None,
                }
            }
            _ => return None,
        };
        Some(target)
    }

    fn parse_influxdb(path: &str) -> Option<Self> {
        let target = match segments(path)?.as_slice() {
            ["buckets", bucket, "measurements"] => Target::InfluxMeasurements {
                bucket: bucket.to_string(),
            },
            ["buckets", bucket, "measurements", m, "fields"] => Target::InfluxFields {
                bucket: bucket.to_string(),
                measurement: m.to_string(),
            },
            ["buckets", bucket, "measurements", m, "tags"] => Target::InfluxTags {
                bucket: bucket.to_string(),
                measurement: m.to_string(),
            },
            ["buckets", bucket, "measurements", m, "tags", tag, "values"] => {
                Target::InfluxTagValues {
                    bucket: bucket.to_string(),
                    measurement: m.to_string(),
                    tag_key: tag.to_string(),
                }
            }
            ["buckets", bucket, "measurements", m, "sample"] => Target::InfluxSample {
                bucket: bucket.to_string(),
                measurement: m.to_string(),
            },
            _ => return None,
        };
        Some(target)
    }

    fn kind(&self) -> BackendKind {
        match self {
            Target::PgTables { .. } | Target::PgTableSchema { .. } | Target::PgTableSample { .. } => {
                BackendKind::Relational
            }
            Target::RedisKeys { .. } | Target::RedisKeyInfo { .. } | Target::RedisKeyValue { .. } => {
                BackendKind::KeyValue
            }
            Target::MongoDatabaseInfo { .. }
            | Target::MongoCollections { .. }
            | Target::MongoCollectionInfo { .. }
            | Target::MongoCollectionSchema { .. }
            | Target::MongoCollectionSample { .. } => BackendKind::Document,
            Target::InfluxMeasurements { .. }
            | Target::InfluxFields { .. }
            | Target::InfluxTags { .. }
            | Target::InfluxTagValues { .. }
            | Target::InfluxSample { .. } => BackendKind::TimeSeries,
        }
    }

    async fn read(&self, session: &Session) -> Result<JsonValue> {
        match self {
            Target::PgTables { database } => {
                postgres::list_tables(&**session.relational()?, database).await
            }
            Target::PgTableSchema { database, table } => {
                postgres::table_info(&**session.relational()?, database, table).await
            }
            Target::PgTableSample { database, table } => {
                let client = &**session.relational()?;
                postgres::sample_rows(client, database, table, TABLE_SAMPLE_LIMIT).await
            }
            Target::RedisKeys { db } => redis::list_keys(&**session.key_value()?, *db, "*").await,
            Target::RedisKeyInfo { db, key } => {
                redis::key_info(&**session.key_value()?, *db, key).await
            }
            Target::RedisKeyValue { db, key } => {
                let (key_type, value) = redis::read_typed(&**session.key_value()?, *db, key).await?;
                Ok(json!({ "database": db, "key": key, "type": key_type, "value": value }))
            }
            Target::MongoDatabaseInfo { database } => {
                mongodb::database_info(&**session.document()?, database).await
            }
            Target::MongoCollections { database } => {
                mongodb::list_collections(&**session.document()?, database).await
            }
            Target::MongoCollectionInfo { database, collection } => {
                mongodb::collection_info(&**session.document()?, database, collection).await
            }
            Target::MongoCollectionSchema { database, collection } => {
                let client = &**session.document()?;
                mongodb::collection_schema(client, database, collection, mongodb::SCHEMA_SAMPLE_SIZE)
                    .await
            }
            Target::MongoCollectionSample { database, collection } => {
                mongodb::sample_documents(&**session.document()?, database, collection).await
            }
            Target::InfluxMeasurements { bucket } => {
                let client = &**session.time_series()?;
                influxdb::list_measurements(client, bucket, influxdb::DEFAULT_START).await
            }
            Target::InfluxFields { bucket, measurement } => {
                let client = &**session.time_series()?;
                influxdb::fields(client, bucket, measurement, influxdb::DEFAULT_START).await
            }
            Target::InfluxTags { bucket, measurement } => {
                let client = &**session.time_series()?;
                influxdb::tags(client, bucket, measurement, influxdb::DEFAULT_START).await
            }
            Target::InfluxTagValues { bucket, measurement, tag_key } => {
                let client = &**session.time_series()?;
                influxdb::tag_values(client, bucket, measurement, tag_key, influxdb::DEFAULT_START)
                    .await
            }
            Target::InfluxSample { bucket, measurement } => {
                let client = &**session.time_series()?;
                influxdb::sample(
                    client,
                    bucket,
                    measurement,
                    influxdb::DEFAULT_START,
                    influxdb::SAMPLE_LIMIT,
                )
                .await
            }
        }
    }
}

/// Registry of the resources for every enabled backend.
pub struct ResourceRegistry {
    resources: Vec<ResourceDef>,
    templates: Vec<ResourceTemplate>,
    enabled: Vec<BackendKind>,
}

impl ResourceRegistry {
    pub fn new(config: &AppConfig) -> Self {
        let mut resources = vec![
            ResourceDef::new("mcp://sessions", "Sessions", "Active sessions and their connected backends"),
            ResourceDef::new("mcp://status", "Backend status", "Enabled, configured and connected state per backend"),
        ];
        let mut templates = Vec::new();

        if config.is_enabled(BackendKind::Relational) {
            resources.push(ResourceDef::new("postgres://databases", "PostgreSQL databases", "Databases connected for this session"));
            resources.push(ResourceDef::new("postgres://connection", "PostgreSQL connection", "Server version and connection details"));
            templates.push(ResourceTemplate::new("postgres://databases/{database}/tables", "PostgreSQL tables", "Tables in the public schema"));
            templates.push(ResourceTemplate::new("postgres://databases/{database}/tables/{table}/schema", "PostgreSQL table schema", "Column names, types, nullability and defaults"));
            templates.push(ResourceTemplate::new("postgres://databases/{database}/tables/{table}/sample", "PostgreSQL table sample", "The first 10 rows of the table"));
        }
        if config.is_enabled(BackendKind::KeyValue) {
            resources.push(ResourceDef::new("redis://info", "Redis info", "Parsed INFO output"));
            resources.push(ResourceDef::new("redis://databases", "Redis databases", "Logical databases holding keys"));
            templates.push(ResourceTemplate::new("redis://databases/{db}/keys", "Redis keys", "Every key in a logical database"));
            templates.push(ResourceTemplate::new("redis://databases/{db}/keys/{key}/info", "Redis key info", "Type, TTL and memory usage of a key"));
            templates.push(ResourceTemplate::new("redis://databases/{db}/keys/{key}/value", "Redis key value", "The value of a key, read according to its type"));
        }
        if config.is_enabled(BackendKind::Document) {
            resources.push(ResourceDef::new("mongodb://info", "MongoDB info", "buildInfo of the server"));
            resources.push(ResourceDef::new("mongodb://databases", "MongoDB databases", "Databases on the server"));
            templates.push(ResourceTemplate::new("mongodb://databases/{database}/info", "MongoDB database info", "dbStats of a database"));
            templates.push(ResourceTemplate::new("mongodb://databases/{database}/collections", "MongoDB collections", "Collections in a database"));
            templates.push(ResourceTemplate::new("mongodb://databases/{database}/collections/{collection}/info", "MongoDB collection info", "collStats and index names"));
            templates.push(ResourceTemplate::new("mongodb://databases/{database}/collections/{collection}/schema", "MongoDB collection schema", "Field types inferred from 100 sampled documents"));
            templates.push(ResourceTemplate::new("mongodb://databases/{database}/collections/{collection}/sample", "MongoDB collection sample", "The first 10 documents"));
        }
        if config.is_enabled(BackendKind::TimeSeries) {
            resources.push(ResourceDef::new("influxdb://health", "InfluxDB health", "Output of the /health endpoint"));
            resources.push(ResourceDef::new("influxdb://buckets", "InfluxDB buckets", "Buckets of the configured organization"));
            templates.push(ResourceTemplate::new("influxdb://buckets/{bucket}/measurements", "InfluxDB measurements", "Measurements written in the last hour"));
            templates.push(ResourceTemplate::new("influxdb://buckets/{bucket}/measurements/{measurement}/fields", "InfluxDB fields", "Field keys of a measurement"));
            templates.push(ResourceTemplate::new("influxdb://buckets/{bucket}/measurements/{measurement}/tags", "InfluxDB tags", "Tag keys of a measurement"));
            templates.push(ResourceTemplate::new("influxdb://buckets/{bucket}/measurements/{measurement}/tags/{tag}/values", "InfluxDB tag values", "Values of one tag"));
            templates.push(ResourceTemplate::new("influxdb://buckets/{bucket}/measurements/{measurement}/sample", "InfluxDB sample", "Up to 10 records from the last hour"));
        }

        let enabled = BackendKind::ALL
            .into_iter()
            .filter(|kind| config.is_enabled(*kind))
            .collect();

        Self {
            resources,
            templates,
            enabled,
        }
    }

    pub fn resources(&self) -> &[ResourceDef] {
        &self.resources
    }

    pub fn templates(&self) -> &[ResourceTemplate] {
        &self.templates
    }

    /// Render the document behind `uri` for the given session.
    ///
    /// Unknown URIs, and templated URIs of disabled backends, are an `Err`;
    /// backend failures are rendered in the document.
    pub async fn read(&self, sessions: &SessionRegistry, session_id: &str, uri: &str) -> Result<JsonValue> {
        if self.resources.iter().any(|r| r.uri == uri) {
            return match uri {
                "mcp://sessions" => {
                    let list = sessions.list();
                    Ok(json!({ "count": list.len(), "sessions": list }))
                }
                "mcp://status" => Ok(status(sessions, session_id)),
                _ => {
                    let outcome = match sessions.get_or_create(session_id).await {
                        Ok(session) => read_fixed(&session, uri).await,
                        Err(e) => Err(e),
                    };
                    Ok(render(uri, outcome))
                }
            };
        }

        let target = Target::parse(uri)
            .filter(|target| self.enabled.contains(&target.kind()))
            .ok_or_else(|| McpError::UnknownResource(uri.to_string()))?;
        let outcome = match sessions.get_or_create(session_id).await {
            Ok(session) => target.read(&session).await,
            Err(e) => Err(e),
        };
        Ok(render(uri, outcome))
    }
}

fn render(uri: &str, outcome: Result<JsonValue>) -> JsonValue {
    outcome.unwrap_or_else(|e| {
        tracing::warn!("Resource {} failed: {}", uri, e);
        json!({ "error": e.to_string() })
    })
}

/// Per-backend state. Does not create the session.
fn status(sessions: &SessionRegistry, session_id: &str) -> JsonValue {
    let config = sessions.config();
    let session = sessions.get(session_id);
    let backends: Vec<JsonValue> = BackendKind::ALL
        .into_iter()
        .map(|kind| {
            json!({
                "backend": kind.name(),
                "kind": kind,
                "enabled": config.is_enabled(kind),
                "configured": config.is_configured(kind),
                "connected": session.as_ref().is_some_and(|s| s.clients().is_connected(kind)),
            })
        })
        .collect();

    json!({
        "session_id": session_id,
        "session_exists": session.is_some(),
        "backends": backends,
    })
}

async fn read_fixed(session: &Session, uri: &str) -> Result<JsonValue> {
    match uri {
        "postgres://databases" => {
            let client = session.relational()?;
            Ok(json!({
                "default_database": client.default_database(),
                "databases": client.databases(),
            }))
        }
        "postgres://connection" => {
            let client = session.relational()?;
            let rows = client
                .query(
                    client.default_database(),
                    "SELECT version() AS version, current_database() AS database, current_user AS user",
                )
                .await?;
            let mut info = postgres::connection_info(&**client);
            if let (Some(info), Some(JsonValue::Object(row))) = (info.as_object_mut(), rows.into_iter().next()) {
                info.extend(row);
            }
            Ok(info)
        }
        "redis://info" => redis::info(&**session.key_value()?, None).await,
        "redis://databases" => redis::list_databases(&**session.key_value()?).await,
        "mongodb://info" => session.document()?.server_info().await,
        "mongodb://databases" => {
            let databases = session.document()?.list_databases().await?;
            Ok(json!({ "databases": databases }))
        }
        "influxdb://health" => session.time_series()?.health().await,
        "influxdb://buckets" => {
            let buckets = session.time_series()?.list_buckets().await?;
            Ok(json!({ "buckets": buckets }))
        }
        _ => Err(McpError::UnknownResource(uri.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_follow_enabled_backends() {
        let config = AppConfig::from_pairs(&[("ENABLE_MONGODB", "false")]).unwrap();
        let registry = ResourceRegistry::new(&config);
        let uris: Vec<&str> = registry.resources().iter().map(|r| r.uri.as_str()).collect();
        assert!(uris.contains(&"mcp://sessions"));
        assert!(uris.contains(&"postgres://connection"));
        assert!(!uris.contains(&"mongodb://info"));
        assert!(registry.resources().iter().all(|r| r.mime_type == MIME_TYPE));
        assert!(registry
            .templates()
            .iter()
            .all(|t| !t.uri_template.starts_with("mongodb://")));
    }

    #[test]
    fn test_every_template_parses_once_filled_in() {
        let config = AppConfig::from_pairs(&[]).unwrap();
        let registry = ResourceRegistry::new(&config);
        assert_eq!(registry.templates().len(), 16);
        for template in registry.templates() {
            let uri = template
                .uri_template
                .replace("{database}", "app")
                .replace("{table}", "users")
                .replace("{db}", "0")
                .replace("{key}", "k")
                .replace("{collection}", "users")
                .replace("{bucket}", "metrics")
                .replace("{measurement}", "cpu")
                .replace("{tag}", "host");
            assert!(Target::parse(&uri).is_some(), "{} did not parse", uri);
        }
    }

    #[test]
    fn test_parse_postgres_and_mongodb() {
        assert_eq!(
            Target::parse("postgres://databases/app/tables/users/sample"),
            Some(Target::PgTableSample {
                database: "app".into(),
                table: "users".into()
            })
        );
        assert_eq!(
            Target::parse("mongodb://databases/app/collections/users/schema"),
            Some(Target::MongoCollectionSchema {
                database: "app".into(),
                collection: "users".into()
            })
        );
        assert_eq!(Target::parse("postgres://databases/app/tables/users/drop"), None);
        assert_eq!(Target::parse("postgres://databases//tables"), None);
        assert_eq!(Target::parse("mongodb://databases/app/collections/users/"), None);
    }

    #[test]
    fn test_parse_redis_keys_with_slashes() {
        assert_eq!(
            Target::parse("redis://databases/2/keys/user:1/profile/value"),
            Some(Target::RedisKeyValue {
                db: 2,
                key: "user:1/profile".into()
            })
        );
        assert_eq!(Target::parse("redis://databases/0/keys"), Some(Target::RedisKeys { db: 0 }));
        assert_eq!(Target::parse("redis://databases/-1/keys"), None);
        assert_eq!(Target::parse("redis://databases/x/keys"), None);
        assert_eq!(Target::parse("redis://databases/0/keys//info"), None);
    }

    #[test]
    fn test_parse_influxdb_tag_values() {
        assert_eq!(
            Target::parse("influxdb://buckets/metrics/measurements/cpu/tags/host/values"),
            Some(Target::InfluxTagValues {
                bucket: "metrics".into(),
                measurement: "cpu".into(),
                tag_key: "host".into()
            })
        );
        assert_eq!(Target::parse("influxdb://buckets/metrics/measurements/cpu"), None);
        assert_eq!(Target::parse("ftp://buckets/metrics/measurements"), None);
    }
}
