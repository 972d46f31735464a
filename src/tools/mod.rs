//! Tool registry and per-backend tool definitions.
//!
//! Provides the infrastructure for registering, validating and dispatching MCP
//! tools. Every call result is wrapped in the uniform `{success, ...}` envelope.

pub mod influxdb;
pub mod mongodb;
pub mod postgres;
pub mod redis;

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use crate::backend::BackendKind;
use crate::config::AppConfig;
use crate::convert::envelope;
use crate::error::{McpError, Result};
use crate::session::{Session, SessionRegistry};

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    /// A JSON object or array, passed inline or as a JSON-encoded string.
    Json,
}

impl ParamType {
    fn schema(self) -> JsonValue {
        match self {
            ParamType::String => json!({"type": "string"}),
            ParamType::Integer => json!({"type": "integer"}),
            ParamType::Boolean => json!({"type": "boolean"}),
            ParamType::Json => json!({}),
        }
    }

    /// Check and normalize one argument value.
    fn coerce(self, name: &str, value: JsonValue) -> Result<JsonValue> {
        let mismatch = |expected: &str| McpError::invalid_arg(name, format!("expected {}", expected));
        match (self, value) {
            (ParamType::String, JsonValue::String(s)) => Ok(JsonValue::String(s)),
            (ParamType::String, JsonValue::Number(n)) => Ok(JsonValue::String(n.to_string())),
            (ParamType::String, _) => Err(mismatch("a string")),

            (ParamType::Integer, JsonValue::Number(n)) if n.is_i64() => Ok(JsonValue::Number(n)),
            (ParamType::Integer, JsonValue::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(JsonValue::from)
                .map_err(|_| mismatch("an integer")),
            (ParamType::Integer, _) => Err(mismatch("an integer")),

            (ParamType::Boolean, JsonValue::Bool(b)) => Ok(JsonValue::Bool(b)),
            (ParamType::Boolean, JsonValue::String(s)) => match s.to_lowercase().as_str() {
                "true" => Ok(JsonValue::Bool(true)),
                "false" => Ok(JsonValue::Bool(false)),
                _ => Err(mismatch("a boolean")),
            },
            (ParamType::Boolean, _) => Err(mismatch("a boolean")),

            (ParamType::Json, JsonValue::String(s)) => serde_json::from_str(&s)
                .map_err(|e| McpError::invalid_arg(name, format!("invalid JSON: {}", e))),
            (ParamType::Json, value @ (JsonValue::Object(_) | JsonValue::Array(_))) => Ok(value),
            (ParamType::Json, _) => Err(mismatch("a JSON object or array")),
        }
    }
}

/// One declared tool parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    pub default: Option<JsonValue>,
    pub description: String,
}

impl Param {
    pub fn required(name: &'static str, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    pub fn optional(name: &'static str, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
            description: description.into(),
        }
    }

    /// Fill this value in when the caller omits the parameter.
    pub fn with_default(mut self, default: impl Into<JsonValue>) -> Self {
        self.required = false;
        self.default = Some(default.into());
        self
    }

    /// Optional with `default` when one is configured, required otherwise.
    pub fn defaulted_or_required(
        name: &'static str,
        kind: ParamType,
        description: impl Into<String>,
        default: Option<&str>,
    ) -> Self {
        match default {
            Some(value) => Self::optional(name, kind, description).with_default(value),
            None => Self::required(name, kind, description),
        }
    }
}

/// A tool definition for the MCP tools/list response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    /// Tool name (e.g., "postgres_query")
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for the input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonValue,
    #[serde(skip)]
    pub params: Vec<Param>,
}

impl ToolDef {
    /// Create a new tool definition; the input schema is derived from `params`.
    pub fn new(name: &str, description: &str, params: Vec<Param>) -> Self {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &params {
            let mut schema = param.kind.schema();
            if let JsonValue::Object(map) = &mut schema {
                map.insert("description".to_string(), JsonValue::String(param.description.clone()));
                if let Some(default) = &param.default {
                    map.insert("default".to_string(), default.clone());
                }
            }
            properties.insert(param.name.to_string(), schema);
            if param.required {
                required.push(param.name);
            }
        }

        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
            params,
        }
    }

    /// Check arguments against the declared parameters and fill in defaults.
    ///
    /// Undeclared arguments are dropped; `null` counts as absent.
    pub fn validate(&self, mut args: Map<String, JsonValue>) -> Result<Map<String, JsonValue>> {
        let mut out = Map::new();
        for param in &self.params {
            match args.remove(param.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    out.insert(param.name.to_string(), param.kind.coerce(param.name, value)?);
                }
                None => {
                    if let Some(default) = &param.default {
                        let value = param.kind.coerce(param.name, default.clone())?;
                        out.insert(param.name.to_string(), value);
                    } else if param.required {
                        return Err(McpError::MissingArg(param.name.to_string()));
                    }
                }
            }
        }
        Ok(out)
    }
}

/// Registry of the tools for every enabled backend.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    /// Create a registry holding the tools of the enabled backends.
    pub fn new(config: &AppConfig) -> Self {
        let mut tools = Vec::new();

        if config.is_enabled(BackendKind::Relational) {
            tools.extend(postgres::tools());
        }
        if config.is_enabled(BackendKind::KeyValue) {
            tools.extend(redis::tools());
        }
        if config.is_enabled(BackendKind::Document) {
            tools.extend(mongodb::tools(config));
        }
        if config.is_enabled(BackendKind::TimeSeries) {
            tools.extend(influxdb::tools(config));
        }

        Self { tools }
    }

    /// Get all tool definitions.
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Validate, route and run a tool call.
    ///
    /// Only an unknown tool name is an `Err`; everything else, including
    /// validation and backend failures, comes back as an envelope.
    pub async fn dispatch(
        &self,
        sessions: &SessionRegistry,
        session_id: &str,
        name: &str,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue> {
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;

        // Rejected arguments never reach the session or a backend.
        let args = match tool.validate(args) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!("Rejected arguments for {}: {}", name, e);
                return Ok(envelope(Err(e)));
            }
        };

        tracing::debug!("Dispatching {} for session '{}'", name, session_id);
        let outcome = match sessions.get_or_create(session_id).await {
            Ok(session) => route(&session, name, args).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            tracing::warn!("{} failed: {}", name, e);
        }

        Ok(envelope(outcome))
    }
}

async fn route(session: &Session, name: &str, args: Map<String, JsonValue>) -> Result<JsonValue> {
    // Route based on prefix
    if name.starts_with("postgres_") {
        postgres::dispatch(session, name, args).await
    } else if name.starts_with("redis_") {
        redis::dispatch(session, name, args).await
    } else if name.starts_with("mongodb_") {
        mongodb::dispatch(session, name, args).await
    } else if name.starts_with("influxdb_") {
        influxdb::dispatch(session, name, args).await
    } else {
        Err(McpError::UnknownTool(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    fn sample() -> ToolDef {
        ToolDef::new(
            "sample",
            "Sample tool",
            vec![
                Param::required("name", ParamType::String, "A name"),
                Param::optional("limit", ParamType::Integer, "Row limit").with_default(10),
                Param::optional("filter", ParamType::Json, "Filter").with_default("{}"),
                Param::optional("flag", ParamType::Boolean, "A flag"),
            ],
        )
    }

    #[test]
    fn test_schema_lists_required_and_defaults() {
        let tool = sample();
        assert_eq!(tool.input_schema["required"], json!(["name"]));
        assert_eq!(tool.input_schema["properties"]["limit"]["default"], json!(10));
        assert_eq!(tool.input_schema["properties"]["name"]["type"], json!("string"));
    }

    #[test]
    fn test_validate_fills_defaults() {
        let out = sample().validate(args(json!({"name": "x"}))).unwrap();
        assert_eq!(out["limit"], json!(10));
        assert_eq!(out["filter"], json!({}));
        assert!(out.get("flag").is_none());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = sample().validate(Map::new()).unwrap_err();
        assert!(matches!(err, McpError::MissingArg(ref n) if n == "name"));

        let err = sample().validate(args(json!({"name": null}))).unwrap_err();
        assert!(matches!(err, McpError::MissingArg(_)));
    }

    #[test]
    fn test_validate_type_mismatch() {
        let err = sample()
            .validate(args(json!({"name": "x", "limit": "ten"})))
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidArg { ref name, .. } if name == "limit"));

        let err = sample()
            .validate(args(json!({"name": ["x"]})))
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidArg { .. }));
    }

    #[test]
    fn test_validate_json_accepts_string_or_inline() {
        let out = sample()
            .validate(args(json!({"name": "x", "filter": "{\"age\": 3}"})))
            .unwrap();
        assert_eq!(out["filter"], json!({"age": 3}));

        let out = sample()
            .validate(args(json!({"name": "x", "filter": {"age": 3}})))
            .unwrap();
        assert_eq!(out["filter"], json!({"age": 3}));

        assert!(sample()
            .validate(args(json!({"name": "x", "filter": "{not json"})))
            .is_err());
    }

    #[test]
    fn test_validate_coerces_numeric_strings() {
        let out = sample()
            .validate(args(json!({"name": 5, "limit": "25", "flag": "TRUE"})))
            .unwrap();
        assert_eq!(out["name"], json!("5"));
        assert_eq!(out["limit"], json!(25));
        assert_eq!(out["flag"], json!(true));
    }

    #[test]
    fn test_registry_only_holds_enabled_backends() {
        let config = AppConfig::from_pairs(&[("ENABLE_REDIS", "false"), ("ENABLE_INFLUXDB", "false")])
            .unwrap();
        let registry = ToolRegistry::new(&config);
        assert!(registry.get("postgres_query").is_some());
        assert!(registry.get("mongodb_find").is_some());
        assert!(registry.get("redis_get").is_none());
        assert!(registry.tools().iter().all(|t| !t.name.starts_with("influxdb_")));
    }
}
