//!
//! cmsbridge engine interface
//! --------------------------
//! The record tools never write storage directly. They submit a [`Changeset`] to a
//! [`Backend`], which applies each command under a workspace context and reports one
//! result per command, and they read raw rows (live rows plus every workspace version)
//! which the records layer overlays itself.
//!
//! [`memory::MemoryBackend`] is the in-process implementation used by the server and the
//! tests. It follows the CMS versioning model: versioned rows carry `t3ver_wsid`,
//! `t3ver_oid` and `t3ver_state`, see [`version`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::language::Site;
use crate::schema::{MmRelation, MmShape, SchemaRegistry};
use crate::values::as_i64;

pub mod memory;
pub mod version;

#[cfg(test)]
mod memory_tests;

pub use version::VersionState;

/// One stored row. Column values are kept as JSON so every table shares one representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub uid: u32,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

impl Row {
    pub fn new(uid: u32) -> Self { Row { uid, values: Map::new() } }

    pub fn get(&self, column: &str) -> Option<&Value> {
        if column == "uid" { return None; }
        self.values.get(column)
    }

    /// Integer view of a column; missing or non-numeric columns read as 0.
    pub fn int(&self, column: &str) -> i64 {
        if column == "uid" { return self.uid as i64; }
        self.values.get(column).and_then(as_i64).unwrap_or(0)
    }

    pub fn pid(&self) -> u32 { self.int("pid").max(0) as u32 }

    pub fn set(&mut self, column: &str, value: Value) {
        self.values.insert(column.to_string(), value);
    }
}

/// Junction table row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MmRow {
    pub uid_local: u32,
    pub uid_foreign: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tablenames: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fieldname: String,
    #[serde(default)]
    pub sorting: i64,
    #[serde(default)]
    pub sorting_foreign: i64,
}

impl MmRow {
    /// Uid of the owning record for `shape`.
    pub fn owner(&self, shape: MmShape) -> u32 {
        match shape { MmShape::Standard => self.uid_local, MmShape::Opposite => self.uid_foreign }
    }

    /// Uid of the referenced record for `shape`.
    pub fn target(&self, shape: MmShape) -> u32 {
        match shape { MmShape::Standard => self.uid_foreign, MmShape::Opposite => self.uid_local }
    }

    pub fn set_owner(&mut self, shape: MmShape, uid: u32) {
        match shape { MmShape::Standard => self.uid_local = uid, MmShape::Opposite => self.uid_foreign = uid }
    }

    /// Sort key of the relation from the owner's side.
    pub fn position(&self, shape: MmShape) -> i64 {
        match shape { MmShape::Standard => self.sorting, MmShape::Opposite => self.sorting_foreign }
    }

    /// Whether this row belongs to `mm`'s owner field on a shared junction table.
    pub fn matches(&self, mm: &MmRelation) -> bool {
        mm.match_fields.iter().all(|(k, v)| self.match_value(k).map(|x| x == v).unwrap_or(true))
    }

    pub fn match_value(&self, column: &str) -> Option<&str> {
        match column {
            "tablenames" => Some(self.tablenames.as_str()),
            "fieldname" => Some(self.fieldname.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceRecord {
    pub uid: u32,
    pub title: String,
    #[serde(default)]
    pub owners: Vec<String>,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Top,
    Bottom,
    /// Directly after the given sibling.
    After(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Create { table: String, pid: u32, placement: Placement, values: Map<String, Value> },
    Update { table: String, uid: u32, values: Map<String, Value> },
    Delete { table: String, uid: u32 },
    /// Copy `uid` into `language`, then apply `values` to the copy.
    Localize { table: String, uid: u32, language: i64, values: Map<String, Value> },
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Update { .. } => "update",
            Command::Delete { .. } => "delete",
            Command::Localize { .. } => "localize",
        }
    }

    pub fn table(&self) -> &str {
        match self {
            Command::Create { table, .. }
            | Command::Update { table, .. }
            | Command::Delete { table, .. }
            | Command::Localize { table, .. } => table,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub commands: Vec<Command>,
}

impl Changeset {
    pub fn single(cmd: Command) -> Self { Changeset { commands: vec![cmd] } }
}

/// Result of one applied command.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub table: String,
    /// Storage row written by the command: a workspace version, a placeholder, a live row
    /// for live writes, or `None` when the command had nothing to do.
    pub touched: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Table '{0}' is not known to the engine")]
    UnknownTable(String),
    #[error("Parent page {pid} does not exist or cannot hold records of table '{table}'")]
    ParentNotFound { table: String, pid: u32 },
    #[error("Record {uid} of table '{table}' was not found")]
    RecordNotFound { table: String, uid: u32 },
    #[error("Field '{field}' is required for table '{table}'")]
    RequiredField { table: String, field: String },
    #[error("Localization failed: there already are localizations ({existing}) for language {language} of the \"{table}\" record {uid}!")]
    AlreadyLocalized { table: String, uid: u32, language: i64, existing: String },
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    InvalidCommand(String),
}

/// A page reached through site routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRoute {
    /// Default-language page uid.
    pub page_uid: u32,
    pub language: i64,
}

pub trait Backend: Send + Sync {
    fn schema(&self) -> Arc<SchemaRegistry>;

    fn sites(&self) -> Arc<Vec<Site>>;

    /// Every stored row of `table`: live rows, versions, placeholders and soft-deleted rows.
    fn rows(&self, table: &str) -> Vec<Row>;

    fn row(&self, table: &str, uid: u32) -> Option<Row>;

    fn mm_rows(&self, mm_table: &str) -> Vec<MmRow>;

    /// Apply `changeset` inside `workspace` (0 = live). One result per command, in order.
    fn process(&self, workspace: u32, user: &str, changeset: Changeset) -> Vec<Result<Outcome, EngineError>>;

    /// Resolve a frontend URL or path to a page.
    fn resolve_path(&self, url: &str) -> Option<PageRoute>;

    fn workspaces(&self) -> Vec<WorkspaceRecord>;

    fn create_workspace(&self, title: &str, owner: &str) -> Result<WorkspaceRecord, EngineError>;

    /// Persist pending state where the backend supports it.
    fn flush(&self) -> anyhow::Result<()> { Ok(()) }
}

pub type SharedBackend = Arc<dyn Backend>;
