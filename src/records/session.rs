use std::sync::Arc;

use serde_json::Value;

use crate::access::TableAccess;
use crate::config::AccessRules;
use crate::engine::version::overlay;
use crate::engine::{Changeset, Command, EngineError, Outcome, Row, SharedBackend, VersionState};
use crate::error::{AppError, AppResult};
use crate::identity::RequestContext;
use crate::language::LanguageMapping;
use crate::schema::{SchemaRegistry, TableSchema};
use crate::validation::FieldValidator;

/// A record as seen from the active workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleRecord {
    /// Caller-visible uid.
    pub uid: u32,
    pub state: VersionState,
    /// Storage row holding the effective values; its own uid is the storage uid.
    pub row: Row,
}

impl VisibleRecord {
    pub fn value(&self, column: &str) -> Option<Value> {
        if column == "uid" { return Some(Value::from(self.uid)); }
        self.row.get(column).cloned()
    }

    pub fn int(&self, column: &str) -> i64 {
        if column == "uid" { return self.uid as i64; }
        self.row.int(column)
    }

    pub fn storage_uid(&self) -> u32 { self.row.uid }
}

/// Everything one tool call needs: backend, schema, access policy, language mapping and the
/// active workspace of the acting user.
pub struct Session {
    backend: SharedBackend,
    schema: Arc<SchemaRegistry>,
    access: TableAccess,
    languages: LanguageMapping,
    workspace: u32,
    user: String,
}

impl Session {
    pub fn new(backend: SharedBackend, rules: &AccessRules, ctx: &RequestContext) -> Self {
        let schema = backend.schema();
        let languages = LanguageMapping::from_sites(&backend.sites());
        let access = TableAccess::new(schema.clone(), rules.clone(), ctx.is_admin());
        Session { backend, schema, access, languages, workspace: ctx.workspace, user: ctx.user_id().to_string() }
    }

    pub fn backend(&self) -> &SharedBackend { &self.backend }
    pub fn schema(&self) -> &SchemaRegistry { &self.schema }
    pub fn access(&self) -> &TableAccess { &self.access }
    pub fn languages(&self) -> &LanguageMapping { &self.languages }
    pub fn workspace(&self) -> u32 { self.workspace }
    pub fn user(&self) -> &str { &self.user }

    pub fn validator(&self) -> FieldValidator<'_> {
        FieldValidator::new(&self.access, &self.languages)
    }

    /// Schema of an accessible table; restricted and unknown tables fail the same way.
    pub fn table(&self, name: &str) -> AppResult<&TableSchema> {
        self.access.table(name).ok_or_else(|| AppError::table_unavailable(name))
    }

    /// Like [`Session::table`] but also requires the table to be independently readable.
    pub fn addressable_table(&self, name: &str) -> AppResult<&TableSchema> {
        if !self.access.is_addressable(name) { return Err(AppError::table_unavailable(name)); }
        self.table(name)
    }

    /// Every record of `table` visible in the active workspace, in storage order.
    pub fn records(&self, table: &TableSchema) -> Vec<VisibleRecord> {
        let rows = self.backend.rows(&table.name);
        overlay(rows.iter(), table.delete_field(), self.workspace)
            .into_iter()
            .map(|o| VisibleRecord { uid: o.uid, state: o.state, row: o.row.clone() })
            .collect()
    }

    pub fn record(&self, table: &TableSchema, uid: u32) -> Option<VisibleRecord> {
        self.records(table).into_iter().find(|r| r.uid == uid)
    }

    /// Caller-visible uid for a storage row the engine reported.
    pub fn visible_uid(&self, table: &str, storage_uid: u32) -> u32 {
        self.backend
            .row(table, storage_uid)
            .map(|r| VersionState::classify(&r).caller_visible_uid())
            .unwrap_or(storage_uid)
    }

    pub fn submit(&self, cmd: Command) -> Result<Outcome, EngineError> {
        let table = cmd.table().to_string();
        self.backend
            .process(self.workspace, &self.user, Changeset::single(cmd))
            .into_iter()
            .next()
            .unwrap_or_else(|| Err(EngineError::InvalidCommand(format!("No result for command on table '{}'", table))))
    }
}
