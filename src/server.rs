//!
//! cmsbridge HTTP server
//! ---------------------
//! Axum front for the tool registry.
//!
//! Routes:
//! - `GET /` health probe.
//! - `GET /tools` registered tools with their input schemas.
//! - `POST /tools/{name}` run one tool with a JSON parameter object as body.
//!
//! The acting user comes from the `x-cms-user` header, falling back to the configured
//! default user. Tool failures are answered in-band with status 200; only transport-level
//! problems (unknown tool, malformed body, crashed call) use HTTP error statuses.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::BridgeConfig;
use crate::engine::memory::MemoryBackend;
use crate::engine::SharedBackend;
use crate::error::AppError;
use crate::identity::{Principal, RequestContext};
use crate::language::load_sites;
use crate::schema::SchemaRegistry;
use crate::tools::{Params, ToolEnv, ToolRegistry};

pub const USER_HEADER: &str = "x-cms-user";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolRegistry>,
    pub env: ToolEnv,
}

impl AppState {
    pub fn new(backend: SharedBackend, config: BridgeConfig) -> Self {
        AppState { registry: Arc::new(ToolRegistry::with_defaults()), env: ToolEnv::new(backend, config) }
    }

    /// Request context for the user named in `headers`, or the default user.
    pub fn context_for(&self, headers: &HeaderMap) -> RequestContext {
        let user = headers.get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.env.config.default_user.as_str())
            .to_string();
        let principal = if self.env.config.is_admin_user(&user) { Principal::admin(user) } else { Principal::new(user) };
        RequestContext::for_principal(principal)
    }
}

/// Load schema, sites and the record store named by `config`.
pub fn open_backend(config: &BridgeConfig) -> anyhow::Result<SharedBackend> {
    let schema = SchemaRegistry::load(&config.schema_path)
        .with_context(|| format!("While loading schema from {}", config.schema_path.display()))?;
    let sites = load_sites(&config.sites_path)?;
    let backend = match &config.data_path {
        Some(p) => MemoryBackend::open(Arc::new(schema), sites, p)?,
        None => MemoryBackend::new(Arc::new(schema), sites),
    };
    Ok(Arc::new(backend))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "cmsbridge ok" }))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .with_state(state)
}

pub async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let backend = open_backend(&config)?;
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = router(AppState::new(backend, config));
    info!(target: "cmsbridge::server", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_tools(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "tools": state.registry.list() }))
}

fn error_response(err: &AppError) -> (StatusCode, Json<Value>) {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.tool_payload()))
}

fn parse_body(body: &Bytes) -> Result<Params, AppError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Params::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::user("invalid_body".to_string(), "Request body must be a JSON object".to_string())),
        Err(e) => Err(AppError::user("invalid_body".to_string(), format!("Request body is not valid JSON: {}", e))),
    }
}

async fn call_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if state.registry.get(&name).is_none() {
        return error_response(&AppError::not_found("unknown_tool".to_string(), format!("Unknown tool '{}'", name)));
    }
    let params = match parse_body(&body) {
        Ok(p) => p,
        Err(e) => return error_response(&e),
    };
    let mut ctx = state.context_for(&headers);
    let worker = state.clone();
    let tool = name.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let result = worker.registry.call(&worker.env, &mut ctx, &tool, &params);
        if worker.env.config.snapshot_on_write {
            if let Err(e) = worker.env.backend.flush() {
                warn!(target: "cmsbridge::server", "snapshot after '{}' failed: {:#}", tool, e);
            }
        }
        result
    })
    .await;
    match joined {
        Ok(Some(result)) => (StatusCode::OK, Json(json!(result))),
        Ok(None) => error_response(&AppError::not_found("unknown_tool".to_string(), format!("Unknown tool '{}'", name))),
        Err(e) => {
            error!(target: "cmsbridge::server", "tool '{}' crashed: {}", name, e);
            error_response(&AppError::internal("internal_panic".to_string(), "internal server error".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bodies_are_empty_parameter_maps() {
        assert!(parse_body(&Bytes::from_static(b"  ")).unwrap().is_empty());
        assert_eq!(parse_body(&Bytes::from_static(b"{\"table\":\"pages\"}")).unwrap()["table"], "pages");
        assert_eq!(parse_body(&Bytes::from_static(b"[1]")).unwrap_err().code_str(), "invalid_body");
        assert_eq!(parse_body(&Bytes::from_static(b"{oops")).unwrap_err().code_str(), "invalid_body");
    }
}
