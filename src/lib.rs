//! # polydb-mcp
//!
//! MCP (Model Context Protocol) server for PostgreSQL, Redis, MongoDB and InfluxDB.
//!
//! This crate exposes database operations as tools and read-only resources for AI
//! agents, over JSON-RPC 2.0 on stdin/stdout or HTTP.
//!
//! ## Features
//!
//! - **38 tools** across four backends, each registered only when its backend is enabled
//! - **Sessions**: every session id gets its own lazily connected set of clients, up to a limit
//! - **Resources**: backend status and inventories, plus URI templates that reach down to a
//!   single table, key, collection or measurement
//! - **Two transports**: stdio (single `default` session) and HTTP (`mcp-session-id` header,
//!   CORS for browser clients)
//!
//! ## Usage
//!
//! Backends are configured through environment variables and the server is typically
//! launched by an MCP client:
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "polydb": {
//!       "command": "/path/to/polydb-mcp",
//!       "env": { "POSTGRES_HOST": "localhost", "ENABLE_INFLUXDB": "false" }
//!     }
//!   }
//! }
//! ```
//!
//! ## Library Usage
//!
//! For testing or embedding, you can use the library API:
//!
//! ```no_run
//! use std::sync::Arc;
//! use polydb_mcp::{AppConfig, DriverConnector, McpServer, SessionRegistry};
//!
//! # async fn run() -> polydb_mcp::Result<()> {
//! let config = Arc::new(AppConfig::from_env()?);
//! let sessions = Arc::new(SessionRegistry::new(config, Arc::new(DriverConnector)));
//! let server = McpServer::new(sessions);
//!
//! // Run the server (reads from stdin, writes to stdout)
//! server.run_stdio().await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod http;
pub mod resources;
pub mod server;
pub mod session;
pub mod tools;

pub use backend::{
    BackendKind, Connector, DocumentClient, DriverConnector, Endpoint, KeyValueClient,
    RelationalClient, TimeSeriesClient, UpdateCounts,
};
pub use config::AppConfig;
pub use convert::envelope;
pub use error::{McpError, Result};
pub use resources::{ResourceDef, ResourceRegistry, ResourceTemplate};
pub use server::{JsonRpcRequest, JsonRpcResponse, McpServer};
pub use session::{ClientSlots, Session, SessionRegistry, SessionSummary, DEFAULT_SESSION_ID};
pub use tools::{Param, ParamType, ToolDef, ToolRegistry};
