//!
//! cmsbridge configuration
//! -----------------------
//! Settings are read from an optional JSON file and then overridden by `CMSBRIDGE_*`
//! environment variables and command-line flags, in that order. Every key has a default so an
//! empty file (or no file at all) yields a usable development configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Tables never exposed to tool callers regardless of their schema.
pub const DEFAULT_RESTRICTED_TABLES: &[&str] = &[
    "be_users", "be_groups", "be_sessions", "fe_users", "fe_groups", "fe_sessions",
    "sys_log", "sys_history", "sys_registry", "sys_workspace", "sys_refindex",
    "sys_lockedrecords", "sys_file", "sys_file_storage", "sys_be_shortcuts",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessRules {
    pub restricted_tables: Vec<String>,
    /// When set, only these tables are reachable.
    pub allowed_tables: Option<Vec<String>>,
}

impl Default for AccessRules {
    fn default() -> Self {
        Self { restricted_tables: DEFAULT_RESTRICTED_TABLES.iter().map(|s| s.to_string()).collect(), allowed_tables: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub http_port: u16,
    pub schema_path: PathBuf,
    pub sites_path: PathBuf,
    /// JSON snapshot of the record store; loaded at startup when present.
    pub data_path: Option<PathBuf>,
    /// Persist the snapshot after every mutating tool call.
    pub snapshot_on_write: bool,
    pub default_user: String,
    pub admin_users: Vec<String>,
    pub access: AccessRules,
    pub workspace_title_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            http_port: 7879,
            schema_path: PathBuf::from("config/schema.json"),
            sites_path: PathBuf::from("config/sites.json"),
            data_path: None,
            snapshot_on_write: false,
            default_user: "admin".to_string(),
            admin_users: vec!["admin".to_string()],
            access: AccessRules::default(),
            workspace_title_prefix: "Agent workspace".to_string(),
        }
    }
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn csv(v: &str) -> Vec<String> {
    v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Value following `flag` in an argv-style list.
pub fn parse_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

impl BridgeConfig {
    /// Read the JSON file if given; a missing path argument means defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(p) = path else { return Ok(Self::default()); };
        let text = std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read config file: {}", p.display()))?;
        let cfg: BridgeConfig = serde_json::from_str(&text)
            .with_context(|| format!("While parsing config file: {}", p.display()))?;
        Ok(cfg)
    }

    /// Apply `CMSBRIDGE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|k| std::env::var(k).ok());
    }

    pub fn apply_env_from<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(p) = lookup("CMSBRIDGE_HTTP_PORT").and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(v) = lookup("CMSBRIDGE_SCHEMA") { self.schema_path = PathBuf::from(v); }
        if let Some(v) = lookup("CMSBRIDGE_SITES") { self.sites_path = PathBuf::from(v); }
        if let Some(v) = lookup("CMSBRIDGE_DATA") { self.data_path = Some(PathBuf::from(v)); }
        if let Some(b) = lookup("CMSBRIDGE_SNAPSHOT_ON_WRITE").as_deref().and_then(parse_bool) { self.snapshot_on_write = b; }
        if let Some(v) = lookup("CMSBRIDGE_DEFAULT_USER") { self.default_user = v; }
        if let Some(v) = lookup("CMSBRIDGE_ADMIN_USERS") { self.admin_users = csv(&v); }
        if let Some(v) = lookup("CMSBRIDGE_RESTRICTED_TABLES") { self.access.restricted_tables = csv(&v); }
        if let Some(v) = lookup("CMSBRIDGE_ALLOWED_TABLES") {
            let list = csv(&v);
            self.access.allowed_tables = if list.is_empty() { None } else { Some(list) };
        }
    }

    /// Apply `--port <n>` style flags.
    pub fn apply_args(&mut self, args: &[String]) {
        if let Some(p) = parse_arg(args, "--port").and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(v) = parse_arg(args, "--schema") { self.schema_path = PathBuf::from(v); }
        if let Some(v) = parse_arg(args, "--sites") { self.sites_path = PathBuf::from(v); }
        if let Some(v) = parse_arg(args, "--data") { self.data_path = Some(PathBuf::from(v)); }
    }

    pub fn is_admin_user(&self, user: &str) -> bool {
        self.admin_users.iter().any(|u| u == user)
    }
}
