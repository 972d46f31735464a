//! MongoDB tools.
//!
//! Tools: mongodb_find, mongodb_insert, mongodb_update, mongodb_delete,
//!        mongodb_aggregate, mongodb_create_collection, mongodb_list_databases,
//!        mongodb_list_collections, mongodb_database_info, mongodb_collection_info,
//!        mongodb_collection_schema
//!
//! Filters, documents and pipelines are extended JSON, given inline or as a
//! JSON-encoded string.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as JsonValue};

use crate::backend::DocumentClient;
use crate::config::AppConfig;
use crate::convert::{get_array_arg, get_i64_arg, get_json_arg, get_object_arg, get_string_arg};
use crate::error::{McpError, Result};
use crate::session::Session;
use crate::tools::{Param, ParamType, ToolDef};

/// Get all MongoDB tool definitions.
///
/// `database` is optional only when a default database is configured.
pub fn tools(config: &AppConfig) -> Vec<ToolDef> {
    let default_db = config.mongodb.database.as_deref();
    let database = || {
        Param::defaulted_or_required("database", ParamType::String, "Database name", default_db)
    };
    let collection = || Param::required("collection", ParamType::String, "Collection name");

    vec![
        ToolDef::new(
            "mongodb_find",
            "Find documents matching a filter. Returns at most `limit` documents.",
            vec![
                collection(),
                Param::optional("filter", ParamType::Json, "Query filter").with_default("{}"),
                Param::optional("limit", ParamType::Integer, "Maximum documents to return")
                    .with_default(10),
                database(),
            ],
        ),
        ToolDef::new(
            "mongodb_insert",
            "Insert one document. Returns the inserted _id.",
            vec![
                collection(),
                Param::required("document", ParamType::Json, "Document to insert"),
                database(),
            ],
        ),
        ToolDef::new(
            "mongodb_update",
            "Update every document matching a filter, e.g. update {\"$set\": {\"active\": true}}.",
            vec![
                collection(),
                Param::required("filter", ParamType::Json, "Query filter"),
                Param::required("update", ParamType::Json, "Update document with operators"),
                database(),
            ],
        ),
        ToolDef::new(
            "mongodb_delete",
            "Delete every document matching a filter.",
            vec![
                collection(),
                Param::required("filter", ParamType::Json, "Query filter"),
                database(),
            ],
        ),
        ToolDef::new(
            "mongodb_aggregate",
            "Run an aggregation pipeline. `pipeline` is a JSON array of stages.",
            vec![
                collection(),
                Param::required("pipeline", ParamType::Json, "Aggregation stages"),
                database(),
            ],
        ),
        ToolDef::new(
            "mongodb_create_collection",
            "Create a collection.",
            vec![collection(), database()],
        ),
        ToolDef::new(
            "mongodb_list_databases",
            "List the databases on the server.",
            vec![],
        ),
        ToolDef::new(
            "mongodb_list_collections",
            "List the collections in a database.",
            vec![database()],
        ),
        ToolDef::new(
            "mongodb_database_info",
            "Statistics for a database: collection, object and index counts and sizes.",
            vec![database()],
        ),
        ToolDef::new(
            "mongodb_collection_info",
            "Statistics for a collection: document count, sizes and index names.",
            vec![collection(), database()],
        ),
        ToolDef::new(
            "mongodb_collection_schema",
            "Infer the top-level fields of a collection from a random sample: each \
             field's most common type, type distribution and how often it is present.",
            vec![
                collection(),
                Param::optional("sample_size", ParamType::Integer, "Documents to sample")
                    .with_default(SCHEMA_SAMPLE_SIZE),
                database(),
            ],
        ),
    ]
}

/// Documents returned by the sample resource.
pub(crate) const SAMPLE_LIMIT: i64 = 10;

/// Documents sampled when inferring a schema.
pub(crate) const SCHEMA_SAMPLE_SIZE: i64 = 100;

/// Type name of a relaxed extended JSON value.
fn value_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "int",
        JsonValue::Number(_) => "double",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(map) => {
            let wrapper = if map.len() == 1 { map.keys().next() } else { None };
            match wrapper.map(String::as_str) {
                Some("$oid") => "objectId",
                Some("$date") => "date",
                Some("$numberLong") => "long",
                Some("$numberDecimal") => "decimal",
                Some("$binary") => "binary",
                Some("$regularExpression") => "regex",
                Some("$timestamp") => "timestamp",
                _ => "object",
            }
        }
    }
}

/// Per-field type statistics over a set of sampled documents.
pub fn infer_schema(documents: &[JsonValue]) -> JsonValue {
    let mut fields: BTreeMap<&str, BTreeMap<&'static str, usize>> = BTreeMap::new();
    for doc in documents {
        if let Some(object) = doc.as_object() {
            for (name, value) in object {
                *fields
                    .entry(name.as_str())
                    .or_default()
                    .entry(value_type(value))
                    .or_default() += 1;
            }
        }
    }

    let total = documents.len().max(1) as f64;
    let schema: Map<String, JsonValue> = fields
        .into_iter()
        .map(|(name, types)| {
            let present: usize = types.values().sum();
            // Highest count wins; ties go to the alphabetically first type.
            let primary = types
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
                .map(|(t, _)| *t)
                .unwrap_or("null");
            (
                name.to_string(),
                json!({
                    "primary_type": primary,
                    "type_distribution": types,
                    "frequency": present as f64 / total,
                }),
            )
        })
        .collect();

    JsonValue::Object(schema)
}

pub(crate) async fn list_collections(client: &dyn DocumentClient, database: &str) -> Result<JsonValue> {
    let collections = client.list_collections(database).await?;
    Ok(json!({ "database": database, "collections": collections }))
}

pub(crate) async fn database_info(client: &dyn DocumentClient, database: &str) -> Result<JsonValue> {
    let stats = client.database_stats(database).await?;
    Ok(json!({ "database": database, "stats": stats }))
}

pub(crate) async fn collection_info(
    client: &dyn DocumentClient,
    database: &str,
    collection: &str,
) -> Result<JsonValue> {
    let stats = client.collection_stats(database, collection).await?;
    Ok(json!({ "database": database, "collection": collection, "stats": stats }))
}

/// Infer a schema from up to `sample_size` randomly chosen documents.
pub(crate) async fn collection_schema(
    client: &dyn DocumentClient,
    database: &str,
    collection: &str,
    sample_size: i64,
) -> Result<JsonValue> {
    if sample_size <= 0 {
        return Err(McpError::invalid_arg("sample_size", "must be positive"));
    }
    let pipeline = vec![json!({ "$sample": { "size": sample_size } })];
    let documents = client.aggregate(database, collection, pipeline).await?;
    Ok(json!({
        "database": database,
        "collection": collection,
        "sample_size": documents.len(),
        "fields": infer_schema(&documents),
    }))
}

pub(crate) async fn sample_documents(
    client: &dyn DocumentClient,
    database: &str,
    collection: &str,
) -> Result<JsonValue> {
    let documents = client
        .find(database, collection, json!({}), SAMPLE_LIMIT)
        .await?;
    Ok(json!({
        "database": database,
        "collection": collection,
        "limit": SAMPLE_LIMIT,
        "count": documents.len(),
        "documents": documents,
    }))
}

/// Dispatch a MongoDB tool call.
pub async fn dispatch(session: &Session, name: &str, args: Map<String, JsonValue>) -> Result<JsonValue> {
    let client = &**session.document()?;

    match name {
        "mongodb_find" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            let filter = JsonValue::Object(get_object_arg(&args, "filter")?);
            let limit = get_i64_arg(&args, "limit")?;
            if limit <= 0 {
                return Err(McpError::invalid_arg("limit", "must be positive"));
            }

            let documents = client.find(&database, &collection, filter, limit).await?;
            Ok(json!({ "count": documents.len(), "documents": documents }))
        }

        "mongodb_insert" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            let document = JsonValue::Object(get_object_arg(&args, "document")?);

            let inserted_id = client.insert_one(&database, &collection, document).await?;
            Ok(json!({ "inserted_id": inserted_id }))
        }

        "mongodb_update" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            let filter = JsonValue::Object(get_object_arg(&args, "filter")?);
            let update = get_json_arg(&args, "update")?;
            if !update.is_object() {
                return Err(McpError::invalid_arg("update", "expected a JSON object"));
            }

            let counts = client.update_many(&database, &collection, filter, update).await?;
            Ok(json!({
                "matched_count": counts.matched,
                "modified_count": counts.modified,
            }))
        }

        "mongodb_delete" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            let filter = JsonValue::Object(get_object_arg(&args, "filter")?);

            let deleted_count = client.delete_many(&database, &collection, filter).await?;
            Ok(json!({ "deleted_count": deleted_count }))
        }

        "mongodb_aggregate" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            let pipeline = get_array_arg(&args, "pipeline")?;

            let results = client.aggregate(&database, &collection, pipeline).await?;
            Ok(json!({ "count": results.len(), "results": results }))
        }

        "mongodb_create_collection" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;

            client.create_collection(&database, &collection).await?;
            Ok(json!({ "database": database, "collection": collection }))
        }

        "mongodb_list_databases" => {
            let databases = client.list_databases().await?;
            Ok(json!({ "databases": databases }))
        }

        "mongodb_list_collections" => {
            let database = get_string_arg(&args, "database")?;
            list_collections(client, &database).await
        }

        "mongodb_database_info" => {
            let database = get_string_arg(&args, "database")?;
            database_info(client, &database).await
        }

        "mongodb_collection_info" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            collection_info(client, &database, &collection).await
        }

        "mongodb_collection_schema" => {
            let database = get_string_arg(&args, "database")?;
            let collection = get_string_arg(&args, "collection")?;
            let sample_size = get_i64_arg(&args, "sample_size")?;
            collection_schema(client, &database, &collection, sample_size).await
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_recognizes_extended_json() {
        assert_eq!(value_type(&json!({"$oid": "507f1f77bcf86cd799439011"})), "objectId");
        assert_eq!(value_type(&json!({"$date": "2024-01-01T00:00:00Z"})), "date");
        assert_eq!(value_type(&json!({"city": "Oslo"})), "object");
        assert_eq!(value_type(&json!(3)), "int");
        assert_eq!(value_type(&json!(2.5)), "double");
    }

    #[test]
    fn test_infer_schema() {
        let docs = vec![
            json!({"_id": 1, "name": "ada", "age": 36}),
            json!({"_id": 2, "name": "bob", "age": "unknown"}),
            json!({"_id": 3, "name": "cy", "age": 41, "email": null}),
            json!({"_id": 4, "name": 7}),
        ];
        let schema = infer_schema(&docs);

        assert_eq!(schema["name"]["primary_type"], json!("string"));
        assert_eq!(schema["name"]["type_distribution"], json!({"string": 3, "int": 1}));
        assert_eq!(schema["name"]["frequency"], json!(1.0));
        assert_eq!(schema["age"]["primary_type"], json!("int"));
        assert_eq!(schema["age"]["frequency"], json!(0.75));
        assert_eq!(schema["email"]["primary_type"], json!("null"));
        assert_eq!(schema["email"]["frequency"], json!(0.25));
    }

    #[test]
    fn test_infer_schema_tie_prefers_first_type_name() {
        let schema = infer_schema(&[json!({"v": "a"}), json!({"v": 1})]);
        assert_eq!(schema["v"]["primary_type"], json!("int"));
    }

    #[test]
    fn test_infer_schema_of_nothing() {
        assert_eq!(infer_schema(&[]), json!({}));
    }
}
