//! PostgreSQL tools.
//!
//! Tools: postgres_query, postgres_execute, postgres_list_databases,
//!        postgres_list_tables, postgres_table_info, postgres_create_table,
//!        postgres_create_database, postgres_connection_info

use serde_json::{json, Map, Value as JsonValue};

use crate::backend::RelationalClient;
use crate::convert::{check_identifier, get_optional_string, get_string_arg};
use crate::error::{McpError, Result};
use crate::session::Session;
use crate::tools::{Param, ParamType, ToolDef};

fn database_param() -> Param {
    Param::optional(
        "database",
        ParamType::String,
        "Database to use. Defaults to the configured database.",
    )
}

/// Get all PostgreSQL tool definitions.
pub fn tools() -> Vec<ToolDef> {
    vec![
        ToolDef::new(
            "postgres_query",
            "Run a row-returning SQL statement (SELECT, or DML with RETURNING). \
             Returns the rows as JSON objects. Use postgres_execute for statements without rows.",
            vec![
                Param::required("sql", ParamType::String, "SQL statement to run"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "postgres_execute",
            "Run a SQL statement that returns no rows (INSERT, UPDATE, DELETE, DDL). \
             Returns the number of affected rows.",
            vec![
                Param::required("sql", ParamType::String, "SQL statement to run"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "postgres_list_databases",
            "List the databases this session is connected to.",
            vec![],
        ),
        ToolDef::new(
            "postgres_list_tables",
            "List the tables in the public schema of a database.",
            vec![database_param()],
        ),
        ToolDef::new(
            "postgres_table_info",
            "Describe the columns of a table: name, type, nullability and default.",
            vec![
                Param::required("table_name", ParamType::String, "Table to describe"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "postgres_create_table",
            "Create a table. `columns` is the column list as it appears inside \
             CREATE TABLE (...), e.g. \"id SERIAL PRIMARY KEY, name TEXT NOT NULL\".",
            vec![
                Param::required("table_name", ParamType::String, "Plain identifier for the new table"),
                Param::required("columns", ParamType::String, "Column definitions"),
                database_param(),
            ],
        ),
        ToolDef::new(
            "postgres_create_database",
            "Create a new database. It becomes reachable by tools in new sessions.",
            vec![Param::required(
                "database_name",
                ParamType::String,
                "Plain identifier for the new database",
            )],
        ),
        ToolDef::new(
            "postgres_connection_info",
            "Show the server address, role and the databases this session is connected to.",
            vec![],
        ),
    ]
}

/// Address, role and databases of the session's PostgreSQL client.
pub(crate) fn connection_info(client: &dyn RelationalClient) -> JsonValue {
    let endpoint = client.endpoint();
    json!({
        "host": endpoint.host,
        "port": endpoint.port,
        "user": endpoint.user,
        "default_database": client.default_database(),
        "connected_databases": client.databases(),
    })
}

pub(crate) async fn list_tables(client: &dyn RelationalClient, database: &str) -> Result<JsonValue> {
    let tables = client.list_tables(database).await?;
    Ok(json!({ "database": database, "tables": tables }))
}

/// Column descriptions; a table without columns does not exist.
pub(crate) async fn table_info(
    client: &dyn RelationalClient,
    database: &str,
    table: &str,
) -> Result<JsonValue> {
    let columns = client.table_info(database, table).await?;
    if columns.is_empty() {
        return Err(McpError::invalid_arg(
            "table_name",
            format!("table '{}' does not exist in {}", table, database),
        ));
    }
    Ok(json!({ "database": database, "table": table, "columns": columns }))
}

/// First `limit` rows of a table.
pub(crate) async fn sample_rows(
    client: &dyn RelationalClient,
    database: &str,
    table: &str,
    limit: u32,
) -> Result<JsonValue> {
    check_identifier("table_name", table)?;
    let sql = format!("SELECT * FROM \"{}\" LIMIT {}", table, limit);
    let rows = client.query(database, &sql).await?;
    Ok(json!({
        "database": database,
        "table": table,
        "limit": limit,
        "row_count": rows.len(),
        "rows": rows,
    }))
}

/// Dispatch a PostgreSQL tool call.
pub async fn dispatch(session: &Session, name: &str, args: Map<String, JsonValue>) -> Result<JsonValue> {
    let client = &**session.relational()?;
    let database = get_optional_string(&args, "database")
        .unwrap_or_else(|| client.default_database().to_string());

    match name {
        "postgres_query" => {
            let sql = get_string_arg(&args, "sql")?;
            let rows = client.query(&database, &sql).await?;
            Ok(json!({
                "database": database,
                "row_count": rows.len(),
                "rows": rows,
            }))
        }

        "postgres_execute" => {
            let sql = get_string_arg(&args, "sql")?;
            let rows_affected = client.execute(&database, &sql).await?;
            Ok(json!({ "database": database, "rows_affected": rows_affected }))
        }

        "postgres_list_databases" => Ok(json!({ "databases": client.databases() })),

        "postgres_list_tables" => list_tables(client, &database).await,

        "postgres_table_info" => {
            let table = get_string_arg(&args, "table_name")?;
            table_info(client, &database, &table).await
        }

        "postgres_create_table" => {
            let table = get_string_arg(&args, "table_name")?;
            check_identifier("table_name", &table)?;
            let columns = get_string_arg(&args, "columns")?;
            if columns.trim().is_empty() {
                return Err(McpError::invalid_arg("columns", "must not be empty"));
            }

            let sql = format!("CREATE TABLE {} ({})", table, columns);
            let rows_affected = client.execute(&database, &sql).await?;
            Ok(json!({ "database": database, "table": table, "rows_affected": rows_affected }))
        }

        "postgres_create_database" => {
            let new_database = get_string_arg(&args, "database_name")?;
            check_identifier("database_name", &new_database)?;

            // CREATE DATABASE cannot run inside a transaction block; the simple
            // protocol used by `execute` sends it as a standalone statement.
            let sql = format!("CREATE DATABASE {}", new_database);
            client.execute(client.default_database(), &sql).await?;
            Ok(json!({ "database": new_database }))
        }

        "postgres_connection_info" => Ok(connection_info(client)),

        _ => Err(McpError::UnknownTool(name.to_string())),
    }
}
