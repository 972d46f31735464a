//! Redis tools.
//!
//! Tools: redis_command, redis_get, redis_set, redis_delete, redis_list_keys,
//!        redis_flush_database, redis_info, redis_get_key_info,
//!        redis_list_databases

use serde_json::{json, Map, Value as JsonValue};

use crate::backend::KeyValueClient;
use crate::convert::{
    check_redis_command, get_array_arg, get_optional_i64, get_optional_string, get_string_arg,
    keyspace_databases, parse_redis_info, scalar_to_string,
};
use crate::error::{McpError, Result};
use crate::session::Session;
use crate::tools::{Param, ParamType, ToolDef};

fn database_param() -> Param {
    Param::optional(
        "database",
        ParamType::Integer,
        "Logical database number. Defaults to the configured database.",
    )
}

/// Get all Redis tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "redis_command",
            "Run an arbitrary Redis command against the configured database. \
             `args` is a JSON array of the command's arguments, e.g. [\"mykey\", \"0\", \"-1\"]. \
             SELECT is refused; the other tools take a `database` argument instead.",
            vec![
                Param::required("command", ParamType::String, "Command name, e.g. LRANGE"),
                Param::optional("args", ParamType::Json, "Command arguments as a JSON array")
                    .with_default("[]"),
            ],
        ),
        ToolDef::new(
            "redis_get",
            "Read a key according to its type: string, list, set, sorted set (with scores) \
             or hash. Missing keys return type \"none\" and a null value.",
            vec![
                Param::required("key", ParamType::String, "Key to read"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "redis_set",
            "Set a string key, optionally expiring after `ttl_seconds`.",
            vec![
                Param::required("key", ParamType::String, "Key to set"),
                Param::required("value", ParamType::String, "Value to store"),
                Param::optional("ttl_seconds", ParamType::Integer, "Expiry in seconds"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "redis_delete",
            "Delete a key. Returns the number of keys removed.",
            vec![
                Param::required("key", ParamType::String, "Key to delete"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "redis_list_keys",
            "List keys matching a glob-style pattern.",
            vec![
                Param::optional("pattern", ParamType::String, "Glob pattern").with_default("*"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "redis_flush_database",
            "Delete every key in a logical database.",
            vec![database_param()],
        ),
        ToolDef::new(
            "redis_info",
            "Server information from INFO, grouped by section.",
            vec![Param::optional(
                "section",
                ParamType::String,
                "Only this INFO section, e.g. memory",
            )],
        ),
        ToolDef::new(
            "redis_get_key_info",
            "Describe a key: its type, remaining TTL and memory usage in bytes.",
            vec![
                Param::required("key", ParamType::String, "Key to describe"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "redis_list_databases",
            "List the logical databases that hold keys, with their keyspace statistics.",
            vec![],
        ),
    ]
}

async fn run(client: &dyn KeyValueClient, db: i64, parts: &[&str]) -> Result<JsonValue> {
    let argv: Vec<String> = parts.iter().map(|p| p.to_string()).collect();
    client.command(db, &argv).await
}

fn strings(value: JsonValue) -> Vec<JsonValue> {
    match value {
        JsonValue::Array(items) => items,
        JsonValue::Null => Vec::new(),
        other => vec![other],
    }
}

/// Read a key with the command matching its type.
pub(crate) async fn read_typed(client: &dyn KeyValueClient, db: i64, key: &str) -> Result<(String, JsonValue)> {
    let key_type = run(client, db, &["TYPE", key]).await?;
    let key_type = key_type.as_str().unwrap_or("none").to_string();

    let value = match key_type.as_str() {
        "string" => run(client, db, &["GET", key]).await?,
        "list" => run(client, db, &["LRANGE", key, "0", "-1"]).await?,
        "set" => {
            let mut members = strings(run(client, db, &["SMEMBERS", key]).await?);
            members.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
            JsonValue::Array(members)
        }
        "zset" => {
            let flat = strings(run(client, db, &["ZRANGE", key, "0", "-1", "WITHSCORES"]).await?);
            let pairs = flat
                .chunks(2)
                .map(|pair| {
                    let score = pair
                        .get(1)
                        .and_then(|s| s.as_str())
                        .and_then(|s| s.parse::<f64>().ok());
                    json!({ "member": pair[0], "score": score })
                })
                .collect();
            JsonValue::Array(pairs)
        }
        "hash" => {
            let flat = strings(run(client, db, &["HGETALL", key]).await?);
            let mut fields = Map::new();
            for pair in flat.chunks(2) {
                if let (Some(field), Some(value)) = (pair[0].as_str(), pair.get(1)) {
                    fields.insert(field.to_string(), value.clone());
                }
            }
            JsonValue::Object(fields)
        }
        _ => JsonValue::Null,
    };

    Ok((key_type, value))
}

/// Render a `TTL` reply: seconds left, or why there are none.
fn describe_ttl(ttl: i64) -> JsonValue {
    match ttl {
        t if t > 0 => JsonValue::from(t),
        -1 => JsonValue::from("no expiration"),
        _ => JsonValue::from("expired"),
    }
}

/// Type, TTL and memory usage of one key.
pub(crate) async fn key_info(client: &dyn KeyValueClient, db: i64, key: &str) -> Result<JsonValue> {
    let key_type = run(client, db, &["TYPE", key]).await?;
    let ttl = run(client, db, &["TTL", key]).await?.as_i64().unwrap_or(-2);
    // MEMORY USAGE needs Redis 4 and may be renamed or disabled.
    let memory = run(client, db, &["MEMORY", "USAGE", key])
        .await
        .unwrap_or_else(|e| {
            tracing::debug!("MEMORY USAGE unavailable: {}", e);
            JsonValue::Null
        });

    Ok(json!({
        "key": key,
        "database": db,
        "type": key_type.as_str().unwrap_or("none"),
        "ttl": describe_ttl(ttl),
        "memory_usage_bytes": memory,
    }))
}

pub(crate) async fn list_keys(
    client: &dyn KeyValueClient,
    db: i64,
    pattern: &str,
) -> Result<JsonValue> {
    let mut keys = strings(run(client, db, &["KEYS", pattern]).await?);
    keys.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
    Ok(json!({ "database": db, "pattern": pattern, "count": keys.len(), "keys": keys }))
}

/// Parsed `INFO`, optionally a single section.
pub(crate) async fn info(client: &dyn KeyValueClient, section: Option<&str>) -> Result<JsonValue> {
    let db = client.default_db();
    let raw = match section {
        Some(section) => run(client, db, &["INFO", section]).await?,
        None => run(client, db, &["INFO"]).await?,
    };
    let raw = raw
        .as_str()
        .ok_or_else(|| McpError::driver("redis", "INFO did not return text"))?;
    Ok(parse_redis_info(raw))
}

pub(crate) async fn list_databases(client: &dyn KeyValueClient) -> Result<JsonValue> {
    let keyspace = info(client, Some("keyspace")).await?;
    Ok(json!({
        "databases": keyspace_databases(&keyspace),
        "keyspace": keyspace.get("keyspace").cloned().unwrap_or_else(|| json!({})),
    }))
}

/// Dispatch a Redis tool call.
pub async fn dispatch(session: &Session, name: &str, args: Map<String, JsonValue>) -> Result<JsonValue> {
    let client = &**session.key_value()?;
    let db = get_optional_i64(&args, "database").unwrap_or_else(|| client.default_db());
    if db < 0 {
        return Err(McpError::invalid_arg("database", "must not be negative"));
    }

    match name {
        "redis_command" => {
            let command = get_string_arg(&args, "command")?;
            if command.trim().is_empty() {
                return Err(McpError::invalid_arg("command", "must not be empty"));
            }
            check_redis_command(&command)?;
            let mut argv = vec![command];
            for arg in get_array_arg(&args, "args")? {
                argv.push(scalar_to_string("args", &arg)?);
            }
            let result = client.command(db, &argv).await?;
            Ok(json!({ "result": result }))
        }

        "redis_get" => {
            let key = get_string_arg(&args, "key")?;
            let (key_type, value) = read_typed(client, db, &key).await?;
            Ok(json!({ "key": key, "type": key_type, "value": value }))
        }

        "redis_set" => {
            let key = get_string_arg(&args, "key")?;
            let value = get_string_arg(&args, "value")?;
            let result = match get_optional_i64(&args, "ttl_seconds") {
                Some(ttl) if ttl <= 0 => {
                    return Err(McpError::invalid_arg("ttl_seconds", "must be positive"))
                }
                Some(ttl) => {
                    let ttl = ttl.to_string();
                    run(client, db, &["SET", &key, &value, "EX", &ttl]).await?
                }
                None => run(client, db, &["SET", &key, &value]).await?,
            };
            Ok(json!({ "key": key, "result": result }))
        }

        "redis_delete" => {
            let key = get_string_arg(&args, "key")?;
            let deleted = run(client, db, &["DEL", &key]).await?;
            Ok(json!({ "key": key, "deleted": deleted }))
        }

        "redis_list_keys" => {
            let pattern = get_string_arg(&args, "pattern")?;
            list_keys(client, db, &pattern).await
        }

        "redis_flush_database" => {
            let result = run(client, db, &["FLUSHDB"]).await?;
            Ok(json!({ "database": db, "result": result }))
        }

        "redis_info" => {
            let section = get_optional_string(&args, "section");
            Ok(json!({ "info": info(client, section.as_deref()).await? }))
        }

        "redis_get_key_info" => {
            let key = get_string_arg(&args, "key")?;
            key_info(client, db, &key).await
        }

        "redis_list_databases" => list_databases(client).await,

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}
