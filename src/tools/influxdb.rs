//! InfluxDB tools.
//!
//! Tools: influxdb_query, influxdb_write, influxdb_list_buckets,
//!        influxdb_create_bucket, influxdb_delete_data, influxdb_list_measurements,
//!        influxdb_get_fields, influxdb_get_tags, influxdb_get_tag_values,
//!        influxdb_sample_data
//!
//! The exploration tools build their Flux here; bucket, measurement and tag
//! names are quoted as Flux string literals and time ranges are validated.

use std::collections::BTreeSet;

use chrono::DateTime;
use serde_json::{json, Map, Value as JsonValue};

use crate::backend::TimeSeriesClient;
use crate::config::AppConfig;
use crate::convert::{
    get_i64_arg, get_object_arg, get_optional_string, get_string_arg, line_protocol,
    parse_retention,
};
use crate::error::{McpError, Result};
use crate::session::Session;
use crate::tools::{Param, ParamType, ToolDef};

/// Get all InfluxDB tool definitions.
///
/// `bucket` is optional only when a default bucket is configured.
pub fn tools(config: &AppConfig) -> Vec<ToolDef> {
    let default_bucket = config.influxdb.bucket.as_deref();
    let bucket =
        || Param::defaulted_or_required("bucket", ParamType::String, "Bucket name", default_bucket);

    vec![
        ToolDef::new(
            "influxdb_query",
            "Run a Flux query. Returns one JSON object per result record.",
            vec![Param::required("flux_query", ParamType::String, "Flux query text")],
        ),
        ToolDef::new(
            "influxdb_write",
            "Write one point. `fields` and `tags` are JSON objects; integers are written \
             as integer fields. `timestamp` is Unix nanoseconds, defaulting to server time.",
            vec![
                Param::required("measurement", ParamType::String, "Measurement name"),
                Param::required("fields", ParamType::Json, "Field set, e.g. {\"value\": 23.5}"),
                Param::optional("tags", ParamType::Json, "Tag set, e.g. {\"host\": \"a\"}")
                    .with_default("{}"),
                Param::optional("timestamp", ParamType::String, "Unix timestamp in nanoseconds"),
                bucket(),
            ],
        ),
        ToolDef::new(
            "influxdb_list_buckets",
            "List the organization's buckets with their retention rules.",
            vec![],
        ),
        ToolDef::new(
            "influxdb_create_bucket",
            "Create a bucket. Retention is a duration like 30d, 12h or 2w, or \"infinite\".",
            vec![
                Param::required("bucket_name", ParamType::String, "Name of the new bucket"),
                Param::optional("retention_period", ParamType::String, "Retention duration")
                    .with_default("30d"),
            ],
        ),
        ToolDef::new(
            "influxdb_delete_data",
            "Delete points between two RFC 3339 times, optionally narrowed by a delete \
             predicate such as _measurement=\"cpu\".",
            vec![
                Param::required("start_time", ParamType::String, "Start, RFC 3339"),
                Param::required("end_time", ParamType::String, "Stop, RFC 3339"),
                Param::optional("predicate", ParamType::String, "Delete predicate")
                    .with_default(""),
                bucket(),
            ],
        ),
        ToolDef::new(
            "influxdb_list_measurements",
            "List the measurements written to a bucket since `start_time`.",
            vec![bucket(), start_time()],
        ),
        ToolDef::new(
            "influxdb_get_fields",
            "List the field keys of a measurement.",
            vec![measurement(), bucket(), start_time()],
        ),
        ToolDef::new(
            "influxdb_get_tags",
            "List the tag keys of a measurement.",
            vec![measurement(), bucket(), start_time()],
        ),
        ToolDef::new(
            "influxdb_get_tag_values",
            "List the values of one tag of a measurement.",
            vec![
                measurement(),
                Param::required("tag_key", ParamType::String, "Tag key"),
                bucket(),
                start_time(),
            ],
        ),
        ToolDef::new(
            "influxdb_sample_data",
            "Return up to `limit` records of a measurement.",
            vec![
                measurement(),
                Param::optional("limit", ParamType::Integer, "Maximum records to return")
                    .with_default(SAMPLE_LIMIT),
                bucket(),
                start_time(),
            ],
        ),
    ]
}

/// Window searched by the exploration tools and resources.
pub(crate) const DEFAULT_START: &str = "-1h";

/// Records returned by the sample resource.
pub(crate) const SAMPLE_LIMIT: i64 = 10;

fn measurement() -> Param {
    Param::required("measurement", ParamType::String, "Measurement name")
}

fn start_time() -> Param {
    Param::optional(
        "start_time",
        ParamType::String,
        "Range start: a negative duration such as -1h or -7d, or an RFC 3339 time",
    )
    .with_default(DEFAULT_START)
}

/// Quote a value as a Flux string literal.
fn flux_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Whether `value` is a Flux duration literal like `1h`, `30m` or `1h30m`.
fn is_flux_duration(value: &str) -> bool {
    const UNITS: &[&str] = &["ns", "us", "ms", "s", "m", "h", "d", "w", "mo", "y"];
    let mut rest = value;
    if rest.is_empty() {
        return false;
    }
    while !rest.is_empty() {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            return false;
        }
        rest = &rest[digits..];
        let unit = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()).len();
        if !UNITS.contains(&&rest[..unit]) {
            return false;
        }
        rest = &rest[unit..];
    }
    true
}

/// Accept a relative duration (`-1h`) or an RFC 3339 time as a range start.
fn check_start(value: &str) -> Result<()> {
    let relative = value.strip_prefix('-').is_some_and(is_flux_duration);
    if relative || DateTime::parse_from_rfc3339(value).is_ok() {
        Ok(())
    } else {
        Err(McpError::invalid_arg(
            "start_time",
            format!("'{}' is not a duration like -1h or an RFC 3339 time", value),
        ))
    }
}

/// Sorted, de-duplicated `_value` strings of a query result.
fn distinct_values(records: &[JsonValue]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("_value").and_then(|v| v.as_str()))
        .map(str::to_string)
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

fn measurements_flux(bucket: &str, start: &str) -> String {
    format!(
        "import \"influxdata/influxdb/schema\"\n\
         schema.measurements(bucket: {}, start: {})",
        flux_string(bucket),
        start
    )
}

fn fields_flux(bucket: &str, measurement: &str, start: &str) -> String {
    format!(
        "from(bucket: {})\n\
         |> range(start: {})\n\
         |> filter(fn: (r) => r._measurement == {})\n\
         |> keep(columns: [\"_field\"])\n\
         |> distinct(column: \"_field\")",
        flux_string(bucket),
        start,
        flux_string(measurement)
    )
}

fn tags_flux(bucket: &str, measurement: &str, start: &str) -> String {
    format!(
        "import \"influxdata/influxdb/schema\"\n\
         schema.tagKeys(bucket: {}, predicate: (r) => r._measurement == {}, start: {})",
        flux_string(bucket),
        flux_string(measurement),
        start
    )
}

fn tag_values_flux(bucket: &str, measurement: &str, tag_key: &str, start: &str) -> String {
    format!(
        "import \"influxdata/influxdb/schema\"\n\
         schema.tagValues(bucket: {}, tag: {}, predicate: (r) => r._measurement == {}, start: {})",
        flux_string(bucket),
        flux_string(tag_key),
        flux_string(measurement),
        start
    )
}

fn sample_flux(bucket: &str, measurement: &str, start: &str, limit: i64) -> String {
    format!(
        "from(bucket: {})\n\
         |> range(start: {})\n\
         |> filter(fn: (r) => r._measurement == {})\n\
         |> limit(n: {})",
        flux_string(bucket),
        start,
        flux_string(measurement),
        limit
    )
}

pub(crate) async fn list_measurements(
    client: &dyn TimeSeriesClient,
    bucket: &str,
    start: &str,
) -> Result<JsonValue> {
    check_start(start)?;
    let records = client.query(&measurements_flux(bucket, start)).await?;
    Ok(json!({ "bucket": bucket, "measurements": distinct_values(&records) }))
}

pub(crate) async fn fields(
    client: &dyn TimeSeriesClient,
    bucket: &str,
    measurement: &str,
    start: &str,
) -> Result<JsonValue> {
    check_start(start)?;
    let records = client.query(&fields_flux(bucket, measurement, start)).await?;
    Ok(json!({
        "bucket": bucket,
        "measurement": measurement,
        "fields": distinct_values(&records),
    }))
}

/// Tag keys, without the `_start`, `_field` and other system columns.
pub(crate) async fn tags(
    client: &dyn TimeSeriesClient,
    bucket: &str,
    measurement: &str,
    start: &str,
) -> Result<JsonValue> {
    check_start(start)?;
    let records = client.query(&tags_flux(bucket, measurement, start)).await?;
    let tags: Vec<String> = distinct_values(&records)
        .into_iter()
        .filter(|key| !key.starts_with('_'))
        .collect();
    Ok(json!({ "bucket": bucket, "measurement": measurement, "tags": tags }))
}

pub(crate) async fn tag_values(
    client: &dyn TimeSeriesClient,
    bucket: &str,
    measurement: &str,
    tag_key: &str,
    start: &str,
) -> Result<JsonValue> {
    check_start(start)?;
    let flux = tag_values_flux(bucket, measurement, tag_key, start);
    let records = client.query(&flux).await?;
    Ok(json!({
        "bucket": bucket,
        "measurement": measurement,
        "tag_key": tag_key,
        "values": distinct_values(&records),
    }))
}

pub(crate) async fn sample(
    client: &dyn TimeSeriesClient,
    bucket: &str,
    measurement: &str,
    start: &str,
    limit: i64,
) -> Result<JsonValue> {
    if limit <= 0 {
        return Err(McpError::invalid_arg("limit", "must be positive"));
    }
    check_start(start)?;
    let records = client.query(&sample_flux(bucket, measurement, start, limit)).await?;
    Ok(json!({
        "bucket": bucket,
        "measurement": measurement,
        "count": records.len(),
        "records": records,
    }))
}

fn check_time(name: &str, value: &str) -> Result<()> {
    DateTime::parse_from_rfc3339(value)
        .map(|_| ())
        .map_err(|e| McpError::invalid_arg(name, format!("'{}' is not an RFC 3339 time: {}", value, e)))
}

/// Dispatch an InfluxDB tool call.
pub async fn dispatch(session: &Session, name: &str, args: Map<String, JsonValue>) -> Result<JsonValue> {
    let client = &**session.time_series()?;

    match name {
        "influxdb_query" => {
            let flux = get_string_arg(&args, "flux_query")?;
            let records = client.query(&flux).await?;
            Ok(json!({ "count": records.len(), "records": records }))
        }

        "influxdb_write" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let measurement = get_string_arg(&args, "measurement")?;
            let fields = get_object_arg(&args, "fields")?;
            let tags = get_object_arg(&args, "tags")?;
            let timestamp = get_optional_string(&args, "timestamp");

            let line = line_protocol(&measurement, &tags, &fields, timestamp.as_deref())?;
            client.write(&bucket, &line).await?;
            Ok(json!({ "bucket": bucket, "line": line }))
        }

        "influxdb_list_buckets" => {
            let buckets = client.list_buckets().await?;
            Ok(json!({ "buckets": buckets }))
        }

        "influxdb_create_bucket" => {
            let bucket_name = get_string_arg(&args, "bucket_name")?;
            if bucket_name.trim().is_empty() {
                return Err(McpError::invalid_arg("bucket_name", "must not be empty"));
            }
            let retention = parse_retention(&get_string_arg(&args, "retention_period")?)?;

            let bucket = client.create_bucket(&bucket_name, retention).await?;
            Ok(json!({ "bucket": bucket }))
        }

        "influxdb_delete_data" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let start = get_string_arg(&args, "start_time")?;
            let stop = get_string_arg(&args, "end_time")?;
            check_time("start_time", &start)?;
            check_time("end_time", &stop)?;
            let predicate = get_string_arg(&args, "predicate")?;

            client.delete(&bucket, &start, &stop, &predicate).await?;
            Ok(json!({ "bucket": bucket, "start": start, "stop": stop }))
        }

        "influxdb_list_measurements" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let start = get_string_arg(&args, "start_time")?;
            list_measurements(client, &bucket, &start).await
        }

        "influxdb_get_fields" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let measurement = get_string_arg(&args, "measurement")?;
            let start = get_string_arg(&args, "start_time")?;
            fields(client, &bucket, &measurement, &start).await
        }

        "influxdb_get_tags" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let measurement = get_string_arg(&args, "measurement")?;
            let start = get_string_arg(&args, "start_time")?;
            tags(client, &bucket, &measurement, &start).await
        }

        "influxdb_get_tag_values" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let measurement = get_string_arg(&args, "measurement")?;
            let tag_key = get_string_arg(&args, "tag_key")?;
            let start = get_string_arg(&args, "start_time")?;
            tag_values(client, &bucket, &measurement, &tag_key, &start).await
        }

        "influxdb_sample_data" => {
            let bucket = get_string_arg(&args, "bucket")?;
            let measurement = get_string_arg(&args, "measurement")?;
            let start = get_string_arg(&args, "start_time")?;
            let limit = get_i64_arg(&args, "limit")?;
            sample(client, &bucket, &measurement, &start, limit).await
        }

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_required_without_configured_default() {
        let config = AppConfig::from_pairs(&[]).unwrap();
        let write = tools(&config)
            .into_iter()
            .find(|t| t.name == "influxdb_write")
            .unwrap();
        assert!(write.input_schema["required"]
            .as_array()
            .unwrap()
            .contains(&json!("bucket")));

        let config = AppConfig::from_pairs(&[("INFLUXDB_BUCKET", "metrics")]).unwrap();
        let write = tools(&config)
            .into_iter()
            .find(|t| t.name == "influxdb_write")
            .unwrap();
        assert_eq!(write.input_schema["properties"]["bucket"]["default"], json!("metrics"));
    }

    #[test]
    fn test_check_time() {
        assert!(check_time("start_time", "2024-01-01T00:00:00Z").is_ok());
        assert!(check_time("start_time", "yesterday").is_err());
    }

    #[test]
    fn test_check_start() {
        assert!(check_start("-1h").is_ok());
        assert!(check_start("-1h30m").is_ok());
        assert!(check_start("-2mo").is_ok());
        assert!(check_start("2024-01-01T00:00:00Z").is_ok());
        assert!(check_start("1h").is_err());
        assert!(check_start("-h").is_err());
        assert!(check_start("-1h) |> drop()").is_err());
        assert!(check_start("").is_err());
    }

    #[test]
    fn test_flux_string_escapes() {
        assert_eq!(flux_string("cpu"), "\"cpu\"");
        assert_eq!(flux_string(r#"a"b\c${x}"#), r#""a\"b\\c\${x}""#);
    }

    #[test]
    fn test_sample_flux() {
        assert_eq!(
            sample_flux("metrics", "cpu", "-1h", 5),
            "from(bucket: \"metrics\")\n\
             |> range(start: -1h)\n\
             |> filter(fn: (r) => r._measurement == \"cpu\")\n\
             |> limit(n: 5)"
        );
    }

    #[test]
    fn test_distinct_values_sorts_and_dedupes() {
        let records = vec![json!({"_value": "mem"}), json!({"_value": "cpu"}), json!({"_value": "cpu"})];
        assert_eq!(distinct_values(&records), vec!["cpu", "mem"]);
    }
}
