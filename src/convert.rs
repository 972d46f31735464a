//! Conversion utilities shared by the tools and resources.
//!
//! Argument extraction, the uniform result envelope, and the small text formats
//! the backends speak (Influx line protocol, Redis INFO output).

use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Wrap an operation outcome in the uniform envelope.
///
/// Object results are flattened next to `success`; any other value is placed
/// under `result`.
pub fn envelope(outcome: Result<JsonValue>) -> JsonValue {
    let mut out = Map::new();
    match outcome {
        Ok(JsonValue::Object(fields)) => {
            out.insert("success".to_string(), JsonValue::Bool(true));
            for (k, v) in fields {
                if k != "success" {
                    out.insert(k, v);
                }
            }
        }
        Ok(value) => {
            out.insert("success".to_string(), JsonValue::Bool(true));
            out.insert("result".to_string(), value);
        }
        Err(err) => {
            out.insert("success".to_string(), JsonValue::Bool(false));
            out.insert("error".to_string(), JsonValue::String(err.to_string()));
        }
    }
    JsonValue::Object(out)
}

/// Helper to get a required string argument from JSON arguments.
pub fn get_string_arg(args: &Map<String, JsonValue>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| McpError::MissingArg(name.to_string()))
}

/// Helper to get an optional string argument from JSON arguments.
pub fn get_optional_string(args: &Map<String, JsonValue>, name: &str) -> Option<String> {
    args.get(name).and_then(|v| v.as_str()).map(|s| s.to_string())
}

/// Helper to get a required i64 argument from JSON arguments.
pub fn get_i64_arg(args: &Map<String, JsonValue>, name: &str) -> Result<i64> {
    args.get(name)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| McpError::MissingArg(name.to_string()))
}

/// Helper to get an optional i64 argument from JSON arguments.
pub fn get_optional_i64(args: &Map<String, JsonValue>, name: &str) -> Option<i64> {
    args.get(name).and_then(|v| v.as_i64())
}

/// Helper to get a required JSON argument (already parsed by validation).
pub fn get_json_arg(args: &Map<String, JsonValue>, name: &str) -> Result<JsonValue> {
    args.get(name)
        .cloned()
        .ok_or_else(|| McpError::MissingArg(name.to_string()))
}

/// Helper to get a required JSON object argument.
pub fn get_object_arg(args: &Map<String, JsonValue>, name: &str) -> Result<Map<String, JsonValue>> {
    match get_json_arg(args, name)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(McpError::invalid_arg(name, "expected a JSON object")),
    }
}

/// Helper to get a required JSON array argument.
pub fn get_array_arg(args: &Map<String, JsonValue>, name: &str) -> Result<Vec<JsonValue>> {
    match get_json_arg(args, name)? {
        JsonValue::Array(items) => Ok(items),
        _ => Err(McpError::invalid_arg(name, "expected a JSON array")),
    }
}

/// Render a scalar JSON value as a command argument.
pub fn scalar_to_string(name: &str, value: &JsonValue) -> Result<String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        _ => Err(McpError::invalid_arg(name, "expected strings, numbers or booleans")),
    }
}

/// Refuse Redis commands that change the connection's selected database.
///
/// Connections are shared across calls, so the logical database is chosen per
/// call through the `database` argument instead.
pub fn check_redis_command(command: &str) -> Result<()> {
    if command.trim().eq_ignore_ascii_case("SELECT") {
        return Err(McpError::invalid_arg(
            "command",
            "SELECT is not allowed; pass the `database` argument instead",
        ));
    }
    Ok(())
}

/// Accept only plain SQL identifiers (letters, digits, underscore; not starting with a digit).
pub fn check_identifier(name: &str, value: &str) -> Result<()> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && value.len() <= 63 {
        Ok(())
    } else {
        Err(McpError::invalid_arg(name, format!("'{}' is not a valid identifier", value)))
    }
}

/// Build one line of Influx line protocol.
///
/// Integers are written with the `i` suffix, strings are quoted, and the
/// measurement, tag keys/values and field keys are escaped.
pub fn line_protocol(
    measurement: &str,
    tags: &Map<String, JsonValue>,
    fields: &Map<String, JsonValue>,
    timestamp: Option<&str>,
) -> Result<String> {
    if measurement.is_empty() {
        return Err(McpError::invalid_arg("measurement", "must not be empty"));
    }
    if fields.is_empty() {
        return Err(McpError::invalid_arg("fields", "at least one field is required"));
    }

    let mut line = escape(measurement, &[',', ' ']);

    let mut tag_keys: Vec<&String> = tags.keys().collect();
    tag_keys.sort();
    for key in tag_keys {
        let value = scalar_to_string("tags", &tags[key])?;
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(&value, &[',', '=', ' ']));
    }

    let rendered = fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                JsonValue::Number(n) if n.is_i64() || n.is_u64() => format!("{}i", n),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::String(s) => format!("\"{}\"", escape(s, &['"', '\\'])),
                _ => {
                    return Err(McpError::invalid_arg(
                        "fields",
                        format!("field '{}' must be a number, boolean or string", key),
                    ))
                }
            };
            Ok(format!("{}={}", escape(key, &[',', '=', ' ']), value))
        })
        .collect::<Result<Vec<String>>>()?;

    line.push(' ');
    line.push_str(&rendered.join(","));

    if let Some(ts) = timestamp.filter(|ts| !ts.is_empty()) {
        if !ts.chars().all(|c| c.is_ascii_digit()) {
            return Err(McpError::invalid_arg(
                "timestamp",
                "must be a Unix timestamp in nanoseconds",
            ));
        }
        line.push(' ');
        line.push_str(ts);
    }

    Ok(line)
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Parse a retention period like `30d`, `12h` or `infinite` into seconds.
///
/// Zero means keep forever.
pub fn parse_retention(period: &str) -> Result<u64> {
    let period = period.trim().to_lowercase();
    if period == "infinite" || period == "0" {
        return Ok(0);
    }

    let invalid = || {
        McpError::invalid_arg(
            "retention_period",
            format!("'{}' is not a duration like 30d, 12h or infinite", period),
        )
    };

    let unit = period.chars().last().ok_or_else(invalid)?;
    let amount: u64 = period[..period.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        'w' => 604_800,
        _ => return Err(invalid()),
    };
    amount.checked_mul(multiplier).ok_or_else(invalid)
}

/// Parse Redis `INFO` output into a JSON object.
///
/// Section headers become nested objects; numeric values become numbers.
pub fn parse_redis_info(raw: &str) -> JsonValue {
    let mut sections = Map::new();
    let mut current = "server".to_string();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix("# ") {
            current = name.trim().to_lowercase();
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let value = value
                .parse::<i64>()
                .map(JsonValue::from)
                .or_else(|_| value.parse::<f64>().map(JsonValue::from))
                .unwrap_or_else(|_| JsonValue::String(value.to_string()));
            let section = sections
                .entry(current.clone())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            if let JsonValue::Object(map) = section {
                map.insert(key.to_string(), value);
            }
        }
    }

    JsonValue::Object(sections)
}

/// Logical databases listed in the `keyspace` section of `INFO`.
pub fn keyspace_databases(info: &JsonValue) -> Vec<i64> {
    let mut dbs: Vec<i64> = info
        .get("keyspace")
        .and_then(|k| k.as_object())
        .map(|k| {
            k.keys()
                .filter_map(|name| name.strip_prefix("db").and_then(|n| n.parse().ok()))
                .collect()
        })
        .unwrap_or_default();
    dbs.sort_unstable();
    if dbs.is_empty() {
        dbs.push(0);
    }
    dbs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_envelope_success_flattens_objects() {
        let out = envelope(Ok(json!({"rows": [1, 2], "row_count": 2})));
        assert_eq!(out, json!({"success": true, "rows": [1, 2], "row_count": 2}));
    }

    #[test]
    fn test_envelope_success_wraps_scalars() {
        assert_eq!(envelope(Ok(json!(7))), json!({"success": true, "result": 7}));
    }

    #[test]
    fn test_envelope_failure() {
        let out = envelope(Err(McpError::MissingArg("sql".to_string())));
        assert_eq!(
            out,
            json!({"success": false, "error": "missing required argument: sql"})
        );
    }

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("table_name", "users_2024").is_ok());
        assert!(check_identifier("table_name", "_tmp").is_ok());
        assert!(check_identifier("table_name", "2fast").is_err());
        assert!(check_identifier("table_name", "users; DROP TABLE x").is_err());
        assert!(check_identifier("table_name", "").is_err());
    }

    #[test]
    fn test_check_redis_command_refuses_select() {
        assert!(check_redis_command("GET").is_ok());
        assert!(check_redis_command("SELECTX").is_ok());
        for command in ["SELECT", "select", " Select "] {
            let err = check_redis_command(command).unwrap_err();
            assert!(matches!(err, McpError::InvalidArg { ref name, .. } if name == "command"));
        }
    }

    #[test]
    fn test_line_protocol_types_and_tag_order() {
        let line = line_protocol(
            "cpu",
            &obj(json!({"region": "us-west", "host": "server1"})),
            &obj(json!({"usage": 0.5})),
            None,
        )
        .unwrap();
        assert_eq!(line, "cpu,host=server1,region=us-west usage=0.5");

        let line = line_protocol(
            "events",
            &Map::new(),
            &obj(json!({"count": 3})),
            Some("1700000000000000000"),
        )
        .unwrap();
        assert_eq!(line, "events count=3i 1700000000000000000");
    }

    #[test]
    fn test_line_protocol_escaping() {
        let line = line_protocol(
            "disk usage",
            &obj(json!({"mount point": "/var,log"})),
            &obj(json!({"msg": "say \"hi\""})),
            None,
        )
        .unwrap();
        assert_eq!(line, r#"disk\ usage,mount\ point=/var\,log msg="say \"hi\"""#);
    }

    #[test]
    fn test_line_protocol_rejects_bad_input() {
        assert!(line_protocol("m", &Map::new(), &Map::new(), None).is_err());
        assert!(line_protocol("m", &Map::new(), &obj(json!({"v": [1]})), None).is_err());
        assert!(line_protocol("m", &Map::new(), &obj(json!({"v": 1})), Some("yesterday")).is_err());
    }

    #[test]
    fn test_parse_retention() {
        assert_eq!(parse_retention("30d").unwrap(), 2_592_000);
        assert_eq!(parse_retention("1h").unwrap(), 3_600);
        assert_eq!(parse_retention("2w").unwrap(), 1_209_600);
        assert_eq!(parse_retention("infinite").unwrap(), 0);
        assert!(parse_retention("").is_err());
        assert!(parse_retention("ten days").is_err());
        assert!(parse_retention("5y").is_err());
    }

    #[test]
    fn test_parse_redis_info() {
        let raw = "# Server\r\nredis_version:7.2.4\r\nuptime_in_seconds:42\r\n\r\n# Keyspace\r\ndb0:keys=3,expires=0,avg_ttl=0\r\ndb2:keys=1,expires=0,avg_ttl=0\r\n";
        let info = parse_redis_info(raw);
        assert_eq!(info["server"]["redis_version"], json!("7.2.4"));
        assert_eq!(info["server"]["uptime_in_seconds"], json!(42));
        assert_eq!(keyspace_databases(&info), vec![0, 2]);
    }

    #[test]
    fn test_keyspace_defaults_to_db0() {
        assert_eq!(keyspace_databases(&json!({})), vec![0]);
    }
}
