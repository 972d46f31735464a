//! MCP server for PostgreSQL, Redis, MongoDB and InfluxDB.
//!
//! Run with `polydb-mcp` for stdio or `polydb-mcp --mode http --port 8000` for HTTP.
//! Backends are configured through environment variables.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use polydb_mcp::{http, AppConfig, BackendKind, DriverConnector, McpError, McpServer, SessionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Stdio,
    Http,
}

/// MCP server for PostgreSQL, Redis, MongoDB and InfluxDB.
///
/// Exposes database operations as MCP tools and resources for AI agents.
/// Communicates via JSON-RPC 2.0 over stdin/stdout or HTTP.
#[derive(Parser)]
#[command(name = "polydb-mcp")]
#[command(version, about, long_about = None)]
struct Args {
    /// Transport to serve.
    #[arg(long, value_enum, env = "MCP_MODE", default_value = "stdio")]
    mode: Mode,

    /// Address to listen on in HTTP mode.
    #[arg(long, env = "MCP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on in HTTP mode.
    #[arg(long, env = "MCP_PORT", default_value_t = 8000)]
    port: u16,

    /// Shared secret required on /mcp in HTTP mode.
    #[arg(long, env = "MCP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Sessions older than this are closed by the sweeper.
    #[arg(long, default_value_t = 3600)]
    session_max_age_secs: u64,

    /// How often the sweeper runs.
    #[arg(long, default_value_t = 300)]
    sweep_interval_secs: u64,

    /// Most sessions open at once; requests naming a new session beyond it fail.
    #[arg(long, env = "MCP_MAX_SESSIONS", default_value_t = 64)]
    max_sessions: usize,

    /// Enable debug logging to stderr.
    #[arg(long, short)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if verbose {
        if let Ok(directive) = "polydb_mcp=debug".parse() {
            filter = filter.add_directive(directive);
        }
    }

    // stdout is the protocol channel in stdio mode.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn run(args: Args) -> polydb_mcp::Result<()> {
    let config = Arc::new(AppConfig::from_env()?);
    for kind in BackendKind::ALL {
        tracing::info!(
            "{}: enabled={} configured={}",
            kind,
            config.is_enabled(kind),
            config.is_configured(kind)
        );
    }

    let sessions = Arc::new(
        SessionRegistry::new(config, Arc::new(DriverConnector)).with_max_sessions(args.max_sessions.max(1)),
    );
    let sweeper = Arc::clone(&sessions).spawn_sweeper(
        Duration::from_secs(args.sweep_interval_secs.max(1)),
        Duration::from_secs(args.session_max_age_secs),
    );
    let server = Arc::new(McpServer::new(Arc::clone(&sessions)));

    let outcome = match args.mode {
        Mode::Stdio => {
            tracing::info!("Serving MCP over stdio");
            tokio::select! {
                result = server.run_stdio() => result,
                _ = shutdown_signal() => Ok(()),
            }
        }
        Mode::Http => {
            let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse().map_err(|e| {
                McpError::Config(format!("invalid listen address {}:{}: {}", args.host, args.port, e))
            })?;
            if args.api_key.is_none() {
                tracing::warn!("No API key configured; /mcp is open to any caller");
            }
            let router = http::router(Arc::clone(&server), args.api_key.clone());
            http::serve(router, addr, shutdown_signal()).await
        }
    };

    sweeper.abort();
    sessions.close_all().await;
    tracing::info!("All sessions closed");
    outcome
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
