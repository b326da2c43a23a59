//!
//! cmsbridge tools
//! ---------------
//! The tool-call surface. A tool takes a flat JSON parameter map and answers with
//! `{ "isError", "content" }`; failures are always reported in-band. The registry moves
//! every call into the acting user's draft workspace before a tool sees it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::engine::SharedBackend;
use crate::error::{AppError, AppResult};
use crate::identity::RequestContext;
use crate::records::Session;
use crate::validation::ValidationErrors;
use crate::workspace::WorkspaceManager;

pub mod params;

mod get_page;
mod list_tables;
mod read_table;
mod search;
mod table_schema;
mod write_table;

pub use get_page::GetPage;
pub use list_tables::ListTables;
pub use params::Params;
pub use read_table::ReadTable;
pub use search::Search;
pub use table_schema::GetTableSchema;
pub use write_table::WriteTable;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolResult {
    #[serde(rename = "isError")]
    pub is_error: bool,
    pub content: Value,
}

impl ToolResult {
    pub fn ok(content: Value) -> Self { ToolResult { is_error: false, content } }
    pub fn error(content: Value) -> Self { ToolResult { is_error: true, content } }

    pub fn from_error(err: &AppError) -> Self { ToolResult::error(err.tool_payload()) }
}

/// Shared services handed to every call.
#[derive(Clone)]
pub struct ToolEnv {
    pub backend: SharedBackend,
    pub workspaces: Arc<WorkspaceManager>,
    pub config: Arc<BridgeConfig>,
}

impl ToolEnv {
    pub fn new(backend: SharedBackend, config: BridgeConfig) -> Self {
        let workspaces = Arc::new(WorkspaceManager::new(backend.clone(), config.workspace_title_prefix.clone()));
        ToolEnv { backend, workspaces, config: Arc::new(config) }
    }
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the parameter map.
    fn input_schema(&self) -> Value;
    fn execute(&self, session: &Session, params: &Params) -> AppResult<ToolResult>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn with_defaults() -> Self {
        let mut reg = ToolRegistry::new();
        reg.register(ReadTable);
        reg.register(WriteTable);
        reg.register(Search);
        reg.register(ListTables);
        reg.register(GetTableSchema);
        reg.register(GetPage);
        reg
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Name, description and input schema of every registered tool.
    pub fn list(&self) -> Vec<Value> {
        self.tools.values()
            .map(|t| json!({ "name": t.name(), "description": t.description(), "inputSchema": t.input_schema() }))
            .collect()
    }

    /// Run `name` for `ctx`; `None` when no such tool is registered.
    pub fn call(&self, env: &ToolEnv, ctx: &mut RequestContext, name: &str, params: &Params) -> Option<ToolResult> {
        let tool = self.get(name)?;
        if let Err(e) = env.workspaces.switch_to_optimal_workspace(ctx) {
            let err = AppError::from(e);
            warn!(target: "cmsbridge::tools", "workspace selection failed for '{}': {}", ctx.user_id(), err);
            return Some(ToolResult::from_error(&err));
        }
        let session = Session::new(env.backend.clone(), &env.config.access, ctx);
        debug!(target: "cmsbridge::tools", "call tool='{}' user='{}' ws={}", name, ctx.user_id(), ctx.workspace);
        let result = match tool.execute(&session, params) {
            Ok(r) => r,
            Err(e) => {
                debug!(target: "cmsbridge::tools", "tool '{}' failed: {}", name, e);
                ToolResult::from_error(&e)
            }
        };
        Some(result)
    }
}

/// Resolve an optional `language` parameter (numeric id or ISO code).
pub(crate) fn language_param(session: &Session, params: &Params) -> AppResult<Option<i64>> {
    match params.get("language") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => session.languages().resolve(v)
            .map(Some)
            .map_err(|e| AppError::from(ValidationErrors::single(e))),
    }
}

/// Serialize a result struct into tool content.
pub(crate) fn content<T: Serialize>(value: &T) -> AppResult<ToolResult> {
    serde_json::to_value(value)
        .map(ToolResult::ok)
        .map_err(|e| AppError::internal("serialize".to_string(), e.to_string()))
}
