//! Snapshot persistence of the in-memory backend.

mod common;

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Map, Value};

use cmsbridge::config::BridgeConfig;
use cmsbridge::engine::memory::MemoryBackend;
use cmsbridge::engine::{Backend, SharedBackend};
use cmsbridge::identity::{Principal, RequestContext};
use cmsbridge::tools::{ToolEnv, ToolRegistry};

fn call(env: &ToolEnv, tool: &str, params: Value) -> Value {
    let registry = ToolRegistry::with_defaults();
    let mut ctx = RequestContext::for_principal(Principal::new(common::EDITOR));
    let params: Map<String, Value> = params.as_object().cloned().unwrap_or_default();
    let r = registry.call(env, &mut ctx, tool, &params).expect("registered tool");
    assert!(!r.is_error, "{} failed: {}", tool, r.content);
    r.content
}

#[test]
fn test_missing_snapshot_starts_empty() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = MemoryBackend::open(common::schema(), common::sites(), &dir.path().join("absent.json"))?;
    assert!(backend.rows("pages").is_empty());
    Ok(())
}

#[test]
fn test_drafts_survive_a_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("data.json");
    std::fs::write(&path, include_str!("fixtures/dataset.json"))?;

    let backend: SharedBackend = Arc::new(MemoryBackend::open(common::schema(), common::sites(), &path)?);
    let env = ToolEnv::new(backend.clone(), BridgeConfig::default());
    let uid = call(&env, "WriteTable", json!({
        "action": "create", "table": "tt_content", "pid": 2, "data": { "header": "Persisted", "CType": "text" }
    }))["uid"].as_u64().unwrap();
    backend.flush()?;

    let reopened: SharedBackend = Arc::new(MemoryBackend::open(common::schema(), common::sites(), &path)?);
    assert!(reopened.rows("tt_content").iter().any(|r| r.get("header") == Some(&json!("Persisted"))));

    // the same user lands in the same workspace and sees the draft again
    let env = ToolEnv::new(reopened, BridgeConfig::default());
    let read = call(&env, "ReadTable", json!({ "table": "tt_content", "uid": uid }));
    assert_eq!(read["records"][0]["header"], "Persisted");
    Ok(())
}
