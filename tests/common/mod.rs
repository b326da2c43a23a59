//! Shared harness: fixture-backed engine plus the default tool registry.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{Map, Value};

use cmsbridge::config::BridgeConfig;
use cmsbridge::engine::memory::MemoryBackend;
use cmsbridge::engine::version::overlay;
use cmsbridge::engine::{Backend, Row, SharedBackend};
use cmsbridge::identity::{Principal, RequestContext};
use cmsbridge::language::Site;
use cmsbridge::schema::SchemaRegistry;
use cmsbridge::tools::{ToolEnv, ToolRegistry, ToolResult};

pub const EDITOR: &str = "editor";

pub fn schema() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::from_json_str(include_str!("../fixtures/schema.json")).unwrap())
}

pub fn sites() -> Vec<Site> {
    serde_json::from_str(include_str!("../fixtures/sites.json")).unwrap()
}

pub fn memory_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::from_json_str(schema(), sites(), include_str!("../fixtures/dataset.json")).unwrap())
}

pub struct Harness {
    pub backend: Arc<MemoryBackend>,
    pub env: ToolEnv,
    pub registry: ToolRegistry,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let backend = memory_backend();
        let shared: SharedBackend = backend.clone();
        Harness { backend, env: ToolEnv::new(shared, config), registry: ToolRegistry::with_defaults() }
    }

    pub fn call_as(&self, user: &str, tool: &str, params: Value) -> ToolResult {
        let principal = if self.env.config.is_admin_user(user) { Principal::admin(user) } else { Principal::new(user) };
        let mut ctx = RequestContext::for_principal(principal);
        let params: Map<String, Value> = params.as_object().cloned().unwrap_or_default();
        self.registry.call(&self.env, &mut ctx, tool, &params).expect("tool is registered")
    }

    pub fn call(&self, tool: &str, params: Value) -> ToolResult {
        self.call_as(EDITOR, tool, params)
    }

    /// Content of a successful call; panics with the error payload otherwise.
    pub fn ok(&self, tool: &str, params: Value) -> Value {
        let r = self.call(tool, params.clone());
        assert!(!r.is_error, "{} {} failed: {}", tool, params, r.content);
        r.content
    }

    /// Error message of a failed call.
    pub fn err(&self, tool: &str, params: Value) -> String {
        let r = self.call(tool, params.clone());
        assert!(r.is_error, "{} {} unexpectedly succeeded: {}", tool, params, r.content);
        r.content["error"]["message"].as_str().unwrap_or_default().to_string()
    }

    /// Records returned by a ReadTable call.
    pub fn read(&self, params: Value) -> Vec<Value> {
        self.ok("ReadTable", params)["records"].as_array().cloned().unwrap_or_default()
    }

    /// Live view of `table` as the public site would see it.
    pub fn live_rows(&self, table: &str) -> Vec<Row> {
        let rows = self.backend.rows(table);
        let t = self.backend.schema();
        let delete = t.table(table).and_then(|t| t.delete_field().map(str::to_string));
        overlay(rows.iter(), delete.as_deref(), 0).into_iter().map(|o| o.row.clone()).collect()
    }

    pub fn raw_row(&self, table: &str, uid: u32) -> Option<Row> {
        self.backend.row(table, uid)
    }
}

pub fn uid_of(v: &Value) -> u32 {
    v["uid"].as_u64().expect("uid in response") as u32
}
