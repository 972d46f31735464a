//! HTTP transport.
//!
//! `POST /mcp` carries one JSON-RPC message per request; `GET /health` is an
//! unauthenticated liveness check. The session is picked by the
//! `mcp-session-id` header. Browser clients from any origin are allowed
//! through CORS; preflight requests never need the API key.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{rpc_codes, Result};
use crate::server::{JsonRpcResponse, McpServer, SERVER_NAME, SERVER_VERSION};
use crate::session::DEFAULT_SESSION_ID;

/// Header naming the caller's session.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Header carrying the shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone)]
struct HttpState {
    server: Arc<McpServer>,
    api_key: Option<Arc<str>>,
}

/// Build the router. With `api_key` set, `/mcp` requires it.
pub fn router(server: Arc<McpServer>, api_key: Option<String>) -> Router {
    let state = HttpState {
        server,
        api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
    };

    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/health", get(handle_health))
        .with_state(state)
        .layer(cors())
}

/// Any origin may call; the session header is readable by browser clients.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(API_KEY_HEADER),
            HeaderName::from_static(SESSION_HEADER),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(router: Router, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP transport listening on http://{}/mcp", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Whether the request carries the expected key as `x-api-key` or a bearer token.
fn authorized(headers: &HeaderMap, expected: &str) -> bool {
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    api_key == Some(expected) || bearer.map(str::trim) == Some(expected)
}

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID)
        .to_string()
}

async fn handle_mcp(State(state): State<HttpState>, headers: HeaderMap, body: String) -> Response {
    if let Some(expected) = &state.api_key {
        if !authorized(&headers, expected) {
            tracing::warn!("Rejected request without a valid API key");
            let error = JsonRpcResponse::error(
                None,
                rpc_codes::UNAUTHORIZED,
                "Unauthorized: missing or invalid API key".to_string(),
            );
            return (StatusCode::UNAUTHORIZED, Json(error)).into_response();
        }
    }

    let session_id = session_id(&headers);
    match state.server.handle_message(body.trim(), &session_id).await {
        Some(response) => {
            let mut http_response = Json(response).into_response();
            if let Ok(value) = session_id.parse() {
                http_response.headers_mut().insert(SESSION_HEADER, value);
            }
            http_response
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn handle_health(State(state): State<HttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "server": SERVER_NAME,
        "version": SERVER_VERSION,
        "sessions": state.server.sessions().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_authorized_accepts_either_header() {
        let mut headers = HeaderMap::new();
        assert!(!authorized(&headers, "secret"));

        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(authorized(&headers, "secret"));

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(authorized(&headers, "secret"));

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong"));
        assert!(!authorized(&headers, "secret"));
    }

    #[test]
    fn test_session_id_falls_back_to_default() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_id(&headers), DEFAULT_SESSION_ID);

        headers.insert(SESSION_HEADER, HeaderValue::from_static("  "));
        assert_eq!(session_id(&headers), DEFAULT_SESSION_ID);

        headers.insert(SESSION_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(session_id(&headers), "abc");
    }
}
