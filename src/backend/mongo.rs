//! MongoDB adapter built on the official `mongodb` driver.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, Credential, FindOptions};
use mongodb::Client;
use serde_json::Value as JsonValue;

use super::{DocumentClient, UpdateCounts};
use crate::config::MongoConfig;
use crate::error::{McpError, Result};

const APP_NAME: &str = "polydb-mcp";
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

const DATABASE_STATS: &[&str] = &[
    "collections",
    "views",
    "objects",
    "dataSize",
    "storageSize",
    "indexes",
    "indexSize",
];

const COLLECTION_STATS: &[&str] = &[
    "ns",
    "count",
    "size",
    "avgObjSize",
    "storageSize",
    "nindexes",
    "totalIndexSize",
];

pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    /// Build a client and confirm the deployment answers `ping`.
    pub async fn connect(config: &MongoConfig) -> Result<Self> {
        tracing::info!("Connecting to MongoDB at {}:{}", config.host, config.port);

        let mut options = ClientOptions::parse(config.uri()).await?;
        options.app_name = Some(APP_NAME.to_string());
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        if let Some((user, password)) = config.credentials() {
            options.credential = Some(
                Credential::builder()
                    .username(user.to_string())
                    .password(password.to_string())
                    .build(),
            );
        }

        let client = Client::with_options(options)?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                McpError::from(e)
            })?;

        Ok(Self { client })
    }

    fn collection(&self, database: &str, collection: &str) -> mongodb::Collection<Document> {
        self.client.database(database).collection(collection)
    }
}

/// Parse relaxed or canonical extended JSON into a BSON document.
pub fn json_to_document(name: &str, value: JsonValue) -> Result<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(_) => Err(McpError::invalid_arg(name, "expected a JSON object")),
        Err(e) => Err(McpError::invalid_arg(name, e.to_string())),
    }
}

/// Render a document as relaxed extended JSON.
pub fn document_to_json(doc: Document) -> JsonValue {
    Bson::Document(doc).into_relaxed_extjson()
}

/// Keep only the named fields of a command reply, skipping absent ones.
fn pick(reply: &Document, fields: &[&str]) -> serde_json::Map<String, JsonValue> {
    fields
        .iter()
        .filter_map(|field| {
            reply
                .get(*field)
                .map(|v| (field.to_string(), v.clone().into_relaxed_extjson()))
        })
        .collect()
}

#[async_trait]
impl DocumentClient for MongoClient {
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: JsonValue,
        limit: i64,
    ) -> Result<Vec<JsonValue>> {
        let filter = json_to_document("filter", filter)?;
        let options = FindOptions::builder().limit(limit).build();
        let cursor = self.collection(database, collection).find(filter, options).await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(document_to_json).collect())
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: JsonValue,
    ) -> Result<JsonValue> {
        let document = json_to_document("document", document)?;
        let result = self
            .collection(database, collection)
            .insert_one(document, None)
            .await?;
        Ok(result.inserted_id.into_relaxed_extjson())
    }

    async fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: JsonValue,
        update: JsonValue,
    ) -> Result<UpdateCounts> {
        let filter = json_to_document("filter", filter)?;
        let update = json_to_document("update", update)?;
        let result = self
            .collection(database, collection)
            .update_many(filter, update, None)
            .await?;
        Ok(UpdateCounts {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_many(&self, database: &str, collection: &str, filter: JsonValue) -> Result<u64> {
        let filter = json_to_document("filter", filter)?;
        let result = self
            .collection(database, collection)
            .delete_many(filter, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Vec<JsonValue>,
    ) -> Result<Vec<JsonValue>> {
        let stages = pipeline
            .into_iter()
            .map(|stage| json_to_document("pipeline", stage))
            .collect::<Result<Vec<Document>>>()?;
        let cursor = self
            .collection(database, collection)
            .aggregate(stages, None)
            .await?;
        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs.into_iter().map(document_to_json).collect())
    }

    async fn create_collection(&self, database: &str, collection: &str) -> Result<()> {
        self.client
            .database(database)
            .create_collection(collection, None)
            .await?;
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names(None, None).await?)
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.client.database(database).list_collection_names(None).await?)
    }

    async fn server_info(&self) -> Result<JsonValue> {
        let info = self
            .client
            .database("admin")
            .run_command(doc! { "buildInfo": 1 }, None)
            .await?;
        Ok(document_to_json(info))
    }

    async fn database_stats(&self, database: &str) -> Result<JsonValue> {
        let reply = self
            .client
            .database(database)
            .run_command(doc! { "dbStats": 1 }, None)
            .await?;
        Ok(JsonValue::Object(pick(&reply, DATABASE_STATS)))
    }

    async fn collection_stats(&self, database: &str, collection: &str) -> Result<JsonValue> {
        let reply = self
            .client
            .database(database)
            .run_command(doc! { "collStats": collection }, None)
            .await?;
        let indexes = self.collection(database, collection).list_index_names().await?;

        let mut stats = pick(&reply, COLLECTION_STATS);
        stats.insert("indexes".to_string(), JsonValue::from(indexes));
        Ok(JsonValue::Object(stats))
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        tracing::info!("MongoDB client shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_document_rejects_non_objects() {
        let err = json_to_document("filter", serde_json::json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("filter"));
    }

    #[test]
    fn test_document_round_trips_extended_json() {
        let doc = json_to_document(
            "document",
            serde_json::json!({"_id": {"$oid": "507f1f77bcf86cd799439011"}, "n": 3}),
        )
        .unwrap();
        assert!(matches!(doc.get("_id"), Some(Bson::ObjectId(_))));

        let json = document_to_json(doc);
        assert_eq!(json["n"], serde_json::json!(3));
        assert_eq!(json["_id"]["$oid"], serde_json::json!("507f1f77bcf86cd799439011"));
    }

    #[test]
    fn test_pick_skips_missing_fields() {
        let reply = doc! { "ns": "app.users", "count": 3_i32, "ok": 1.0 };
        let picked = pick(&reply, COLLECTION_STATS);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked["ns"], serde_json::json!("app.users"));
        assert_eq!(picked["count"], serde_json::json!(3));
    }
}
