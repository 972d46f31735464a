//! InfluxDB 2.x adapter over the HTTP API.
//!
//! The handle is a plain `reqwest::Client`; it has no teardown contract, so
//! the trait's no-op `close` applies.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response};
use serde_json::{json, Map, Value as JsonValue};

use super::TimeSeriesClient;
use crate::config::InfluxConfig;
use crate::error::{McpError, Result};

pub struct InfluxClient {
    http: reqwest::Client,
    url: String,
    token: String,
    org: String,
}

impl InfluxClient {
    /// Build the HTTP client and check `/health` reports `pass`.
    pub async fn connect(config: &InfluxConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .ok_or_else(|| McpError::Config("INFLUXDB_TOKEN is not set".to_string()))?;
        let org = config
            .org
            .clone()
            .ok_or_else(|| McpError::Config("INFLUXDB_ORG is not set".to_string()))?;

        let client = Self {
            http: reqwest::Client::new(),
            url: config.url(),
            token,
            org,
        };
        tracing::info!("Connecting to InfluxDB at {}", client.url);

        let health = client.health().await?;
        match health.get("status").and_then(|s| s.as_str()) {
            Some("pass") => Ok(client),
            status => Err(McpError::driver(
                "influxdb",
                format!("health check failed: {}", status.unwrap_or("unknown")),
            )),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.url, path))
            .header("Authorization", format!("Token {}", self.token))
    }

    async fn org_id(&self) -> Result<String> {
        let body: JsonValue = checked(
            self.request(reqwest::Method::GET, "/api/v2/orgs")
                .query(&[("org", self.org.as_str())])
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        body.get("orgs")
            .and_then(|orgs| orgs.get(0))
            .and_then(|org| org.get("id"))
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| McpError::driver("influxdb", format!("organization '{}' not found", self.org)))
    }
}

/// Turn non-2xx responses into driver errors carrying the response body.
async fn checked(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<JsonValue>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(McpError::driver("influxdb", format!("HTTP {}: {}", status, message)))
}

/// Parse the annotated CSV returned by `/api/v2/query` into JSON objects.
///
/// Tables are separated by blank lines and each starts with its own header row.
/// Annotation rows (`#...`) and unnamed columns are skipped.
pub fn parse_csv(body: &str) -> Vec<JsonValue> {
    let mut records = Vec::new();
    let mut header: Option<Vec<String>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let fields = split_csv_line(line);
        match &header {
            None => header = Some(fields),
            Some(columns) => {
                let mut record = Map::new();
                for (column, value) in columns.iter().zip(fields) {
                    if column.is_empty() {
                        continue;
                    }
                    record.insert(column.clone(), csv_value(value));
                }
                records.push(JsonValue::Object(record));
            }
        }
    }

    records
}

fn csv_value(raw: String) -> JsonValue {
    if let Ok(n) = raw.parse::<i64>() {
        return JsonValue::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return JsonValue::from(f);
        }
    }
    match raw.as_str() {
        "true" => JsonValue::Bool(true),
        "false" => JsonValue::Bool(false),
        _ => JsonValue::String(raw),
    }
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[async_trait]
impl TimeSeriesClient for InfluxClient {
    async fn query(&self, flux: &str) -> Result<Vec<JsonValue>> {
        let response = self
            .request(reqwest::Method::POST, "/api/v2/query")
            .query(&[("org", self.org.as_str())])
            .header("Accept", "application/csv")
            .json(&json!({ "query": flux, "type": "flux" }))
            .send()
            .await?;
        let body = checked(response).await?.text().await?;
        Ok(parse_csv(&body))
    }

    async fn write(&self, bucket: &str, lines: &str) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, "/api/v2/write")
            .query(&[("org", self.org.as_str()), ("bucket", bucket), ("precision", "ns")])
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(lines.to_string())
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<JsonValue>> {
        let body: JsonValue = checked(
            self.request(reqwest::Method::GET, "/api/v2/buckets")
                .query(&[("org", self.org.as_str()), ("limit", "100")])
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let buckets = body
            .get("buckets")
            .and_then(|b| b.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|b| {
                json!({
                    "id": b.get("id"),
                    "name": b.get("name"),
                    "org_id": b.get("orgID"),
                    "retention_rules": b.get("retentionRules").cloned().unwrap_or(json!([])),
                    "created_at": b.get("createdAt"),
                    "updated_at": b.get("updatedAt"),
                })
            })
            .collect();
        Ok(buckets)
    }

    async fn create_bucket(&self, name: &str, retention_secs: u64) -> Result<JsonValue> {
        let org_id = self.org_id().await?;
        let rules = if retention_secs == 0 {
            json!([])
        } else {
            json!([{ "type": "expire", "everySeconds": retention_secs }])
        };

        let created: JsonValue = checked(
            self.request(reqwest::Method::POST, "/api/v2/buckets")
                .json(&json!({ "name": name, "orgID": org_id, "retentionRules": rules }))
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        Ok(json!({
            "id": created.get("id"),
            "name": created.get("name"),
            "retention_rules": created.get("retentionRules"),
        }))
    }

    async fn delete(&self, bucket: &str, start: &str, stop: &str, predicate: &str) -> Result<()> {
        let mut body = json!({ "start": start, "stop": stop });
        if !predicate.is_empty() {
            body["predicate"] = JsonValue::String(predicate.to_string());
        }

        let response = self
            .request(reqwest::Method::POST, "/api/v2/delete")
            .query(&[("org", self.org.as_str()), ("bucket", bucket)])
            .json(&body)
            .send()
            .await?;
        checked(response).await?;
        Ok(())
    }

    async fn health(&self) -> Result<JsonValue> {
        // /health answers 503 with a JSON body when unhealthy; keep that body.
        let response = self.http.get(format!("{}/health", self.url)).send().await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_multiple_tables() {
        let body = "\
,result,table,_time,_value,_field,host\r
,_result,0,2024-01-01T00:00:00Z,23.5,temperature,server1\r
,_result,0,2024-01-01T00:01:00Z,24,temperature,server1\r
\r
,result,table,_time,_value,_field\r
,_result,1,2024-01-01T00:00:00Z,\"a,b\",note\r
";
        let records = parse_csv(body);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["_value"], json!(23.5));
        assert_eq!(records[1]["_value"], json!(24));
        assert_eq!(records[0]["host"], json!("server1"));
        assert_eq!(records[2]["_value"], json!("a,b"));
        assert!(records[2].get("host").is_none());
        assert!(records[0].get("").is_none());
    }

    #[test]
    fn test_parse_csv_skips_annotations() {
        let body = "#datatype,string,long\n,result,table\n,_result,0\n";
        let records = parse_csv(body);
        assert_eq!(records, vec![json!({"result": "_result", "table": 0})]);
    }

    #[test]
    fn test_split_csv_line_escaped_quotes() {
        assert_eq!(split_csv_line(r#"a,"say ""hi""",c"#), vec!["a", r#"say "hi""#, "c"]);
    }
}
