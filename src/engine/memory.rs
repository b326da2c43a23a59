//!
//! cmsbridge in-memory backend
//! ---------------------------
//! A [`Backend`] that keeps every table, junction table and workspace in memory behind a
//! single `parking_lot::RwLock`. Each command of a changeset is applied under one write-lock
//! acquisition, so a command is atomic while a changeset as a whole is not.
//!
//! Writes inside a workspace never modify live rows:
//! - create inserts a new-record placeholder (`t3ver_state = 1`) owned by the workspace;
//! - the first update of a live row copies it into a workspace version (`t3ver_oid` points
//!   at the live uid) together with its junction rows, later updates edit that version;
//! - delete replaces the version with a delete-placeholder (`t3ver_state = 2`), or drops
//!   the row outright when it only ever existed in the workspace.
//!
//! The state can be seeded from and saved to a JSON dataset
//! (`{ "tables": {..}, "mm": {..}, "workspaces": [..] }`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::version::{overlay, VersionState, OID, STATE, STATE_DEFAULT, STATE_DELETE_PLACEHOLDER, STATE_NEW_PLACEHOLDER, WSID};
use super::{Backend, Changeset, Command, EngineError, MmRow, Outcome, PageRoute, Placement, Row, WorkspaceRecord};
use crate::language::{Site, SiteLanguage};
use crate::schema::{FieldKind, InlineRelation, MmRelation, MmShape, RelationShape, SchemaRegistry, TableSchema};
use crate::values::{as_i64, as_text, csv_uids, is_blank};

const SORT_STEP: i64 = 256;

/// Serialized form of the whole store.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<Row>>,
    #[serde(default)]
    pub mm: BTreeMap<String, Vec<MmRow>>,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceRecord>,
    /// Last uid handed out per table; uids of removed rows are never reused.
    #[serde(default, rename = "uidCounters")]
    pub uid_counters: BTreeMap<String, u32>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, BTreeMap<u32, Row>>,
    mm: BTreeMap<String, Vec<MmRow>>,
    workspaces: Vec<WorkspaceRecord>,
    uid_counters: BTreeMap<String, u32>,
}

pub struct MemoryBackend {
    schema: Arc<SchemaRegistry>,
    sites: Arc<Vec<Site>>,
    state: RwLock<State>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryBackend {
    pub fn new(schema: Arc<SchemaRegistry>, sites: Vec<Site>) -> Self {
        Self::from_dataset(schema, sites, Dataset::default())
    }

    pub fn from_dataset(schema: Arc<SchemaRegistry>, sites: Vec<Site>, dataset: Dataset) -> Self {
        let mut tables: BTreeMap<String, BTreeMap<u32, Row>> = BTreeMap::new();
        for (name, rows) in dataset.tables.into_iter() {
            let entry = tables.entry(name).or_default();
            for r in rows { entry.insert(r.uid, r); }
        }
        let state = State { tables, mm: dataset.mm, workspaces: dataset.workspaces, uid_counters: dataset.uid_counters };
        Self { schema, sites: Arc::new(sites), state: RwLock::new(state), snapshot_path: None }
    }

    pub fn from_json_str(schema: Arc<SchemaRegistry>, sites: Vec<Site>, text: &str) -> anyhow::Result<Self> {
        let ds: Dataset = serde_json::from_str(text).context("While parsing dataset")?;
        Ok(Self::from_dataset(schema, sites, ds))
    }

    /// Load the dataset at `path` when it exists and save back to it on [`Backend::flush`].
    pub fn open(schema: Arc<SchemaRegistry>, sites: Vec<Site>, path: &Path) -> anyhow::Result<Self> {
        let mut me = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read dataset: {}", path.display()))?;
            Self::from_json_str(schema, sites, &text)
                .with_context(|| format!("While loading dataset: {}", path.display()))?
        } else {
            info!(target: "cmsbridge::engine", "dataset '{}' not found; starting empty", path.display());
            Self::new(schema, sites)
        };
        me.snapshot_path = Some(path.to_path_buf());
        Ok(me)
    }

    pub fn dataset(&self) -> Dataset {
        let st = self.state.read();
        Dataset {
            tables: st.tables.iter().map(|(k, v)| (k.clone(), v.values().cloned().collect())).collect(),
            mm: st.mm.clone(),
            workspaces: st.workspaces.clone(),
            uid_counters: st.uid_counters.clone(),
        }
    }

    pub fn save_snapshot(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.dataset())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write snapshot: {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace snapshot: {}", path.display()))?;
        debug!(target: "cmsbridge::engine", "snapshot saved to '{}'", path.display());
        Ok(())
    }
}

impl Backend for MemoryBackend {
    fn schema(&self) -> Arc<SchemaRegistry> { self.schema.clone() }

    fn sites(&self) -> Arc<Vec<Site>> { self.sites.clone() }

    fn rows(&self, table: &str) -> Vec<Row> {
        self.state.read().tables.get(table).map(|m| m.values().cloned().collect()).unwrap_or_default()
    }

    fn row(&self, table: &str, uid: u32) -> Option<Row> {
        self.state.read().row(table, uid).cloned()
    }

    fn mm_rows(&self, mm_table: &str) -> Vec<MmRow> {
        self.state.read().mm.get(mm_table).cloned().unwrap_or_default()
    }

    fn process(&self, workspace: u32, user: &str, changeset: Changeset) -> Vec<Result<Outcome, EngineError>> {
        let mut out = Vec::with_capacity(changeset.commands.len());
        for cmd in changeset.commands.into_iter() {
            let label = cmd.kind();
            let res = {
                let mut st = self.state.write();
                st.check_workspace(workspace, user).and_then(|_| st.apply(&self.schema, workspace, cmd))
            };
            match &res {
                Ok(o) => debug!(target: "cmsbridge::engine", "process ws={} user='{}' cmd={} table='{}' touched={:?}", workspace, user, label, o.table, o.touched),
                Err(e) => debug!(target: "cmsbridge::engine", "process ws={} user='{}' cmd={} failed: {}", workspace, user, label, e),
            }
            out.push(res);
        }
        out
    }

    fn resolve_path(&self, url: &str) -> Option<PageRoute> {
        let (host, path) = split_url(url);
        let path = match urlencoding::decode(&path) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => path.clone(),
        };
        let st = self.state.read();
        let pages_schema = self.schema.table("pages")?;
        let pages = st.tables.get("pages")?;
        for site in self.sites.iter() {
            let (site_host, site_path) = split_url(&site.base);
            if host.is_some() && site_host.is_some() && host != site_host { continue; }
            let Some(rest) = strip_base(&path, &site_path) else { continue; };
            // longest matching language base wins; the default language usually sits at "/"
            let mut langs: Vec<(&SiteLanguage, usize, String)> = site.languages.iter()
                .filter(|l| l.enabled)
                .filter_map(|l| {
                    let (_, base) = split_url(&l.base);
                    strip_base(&rest, &base).map(|r| (l, base.trim_end_matches('/').len(), r))
                })
                .collect();
            langs.sort_by(|a, b| b.1.cmp(&a.1));
            let lf = pages_schema.language_field();
            let tf = pages_schema.translation_parent_field();
            for (lang, _, rest) in langs {
                let slug = normalize_slug(&rest);
                let hit = overlay(pages.values(), pages_schema.delete_field(), 0).into_iter().find(|o| {
                    lf.map(|f| o.row.int(f) == lang.language_id).unwrap_or(lang.language_id == 0)
                        && o.row.get("slug").map(|s| normalize_slug(&as_text(s)) == slug).unwrap_or(false)
                });
                if let Some(o) = hit {
                    let parent = tf.map(|f| o.row.int(f)).unwrap_or(0);
                    let page_uid = if lang.language_id > 0 && parent > 0 { parent as u32 } else { o.uid };
                    return Some(PageRoute { page_uid, language: lang.language_id });
                }
            }
        }
        None
    }

    fn workspaces(&self) -> Vec<WorkspaceRecord> {
        self.state.read().workspaces.clone()
    }

    fn create_workspace(&self, title: &str, owner: &str) -> Result<WorkspaceRecord, EngineError> {
        if title.trim().is_empty() {
            return Err(EngineError::InvalidCommand("Workspace title must not be empty".into()));
        }
        let mut st = self.state.write();
        let uid = st.workspaces.iter().map(|w| w.uid).max().unwrap_or(0) + 1;
        let ws = WorkspaceRecord { uid, title: title.to_string(), owners: vec![owner.to_string()], members: Vec::new() };
        st.workspaces.push(ws.clone());
        info!(target: "cmsbridge::engine", "workspace {} '{}' created for '{}'", uid, title, owner);
        Ok(ws)
    }

    fn flush(&self) -> anyhow::Result<()> {
        match &self.snapshot_path {
            Some(p) => self.save_snapshot(p),
            None => Ok(()),
        }
    }
}

/// Split an absolute URL into host and path; plain paths have no host.
fn split_url(url: &str) -> (Option<String>, String) {
    let url = url.split(['?', '#']).next().unwrap_or("");
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(r) => match r.find('/') {
            Some(i) => (Some(r[..i].to_ascii_lowercase()), r[i..].to_string()),
            None => (Some(r.to_ascii_lowercase()), "/".to_string()),
        },
        None if url.starts_with('/') => (None, url.to_string()),
        None => (None, format!("/{}", url)),
    }
}

fn strip_base(path: &str, base: &str) -> Option<String> {
    let base = base.trim_end_matches('/');
    if base.is_empty() { return Some(path.to_string()); }
    if path == base { return Some("/".to_string()); }
    path.strip_prefix(base).filter(|r| r.starts_with('/')).map(|r| r.to_string())
}

fn normalize_slug(s: &str) -> String {
    let t = s.trim().trim_end_matches('/');
    if t.is_empty() { "/".to_string() } else if t.starts_with('/') { t.to_string() } else { format!("/{}", t) }
}

fn is_deleted(t: &TableSchema, row: &Row) -> bool {
    t.delete_field().map(|f| row.int(f) != 0).unwrap_or(false)
}

fn set_version(row: &mut Row, workspace: u32, oid: u32, state: i64) {
    row.set(WSID, json!(workspace));
    row.set(OID, json!(oid));
    row.set(STATE, json!(state));
}

/// First item of the type field's select list; the CMS uses it when no type is given.
fn default_type_value(t: &TableSchema) -> Option<Value> {
    let f = t.field(t.type_field()?)?;
    match &f.kind {
        FieldKind::Select { items, .. } => items.first().map(|v| match v.parse::<i64>() {
            Ok(n) => json!(n),
            Err(_) => json!(v),
        }),
        _ => None,
    }
}

fn check_required(t: &TableSchema, subtype: Option<&str>, values: &Map<String, Value>, creating: bool) -> Result<(), EngineError> {
    let blank = |name: &str, v: &Value| -> bool {
        is_blank(v) || (t.field(name).map(|f| f.is_date()).unwrap_or(false) && as_i64(v) == Some(0))
    };
    let missing = |field: &str| EngineError::RequiredField { table: t.name.clone(), field: field.to_string() };
    if creating {
        let key = t.resolve_type_key(subtype);
        for name in t.fields_for_type(key) {
            let Some(f) = t.field(name) else { continue; };
            if !f.required { continue; }
            match values.get(name) {
                Some(v) if !blank(name, v) => {}
                _ => return Err(missing(name)),
            }
        }
    } else {
        for (name, v) in values.iter() {
            if t.field(name).map(|f| f.required).unwrap_or(false) && blank(name, v) {
                return Err(missing(name));
            }
        }
    }
    Ok(())
}

impl State {
    fn row(&self, table: &str, uid: u32) -> Option<&Row> {
        self.tables.get(table)?.get(&uid)
    }

    fn next_uid(&mut self, table: &str) -> u32 {
        let highest = self.tables.get(table).and_then(|m| m.keys().next_back().copied()).unwrap_or(0);
        let counter = self.uid_counters.entry(table.to_string()).or_insert(0);
        *counter = (*counter).max(highest) + 1;
        *counter
    }

    fn insert(&mut self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().insert(row.uid, row);
    }

    fn check_workspace(&self, workspace: u32, user: &str) -> Result<(), EngineError> {
        if workspace == 0 { return Ok(()); }
        let ws = self.workspaces.iter().find(|w| w.uid == workspace)
            .ok_or_else(|| EngineError::PermissionDenied(format!("Workspace {} does not exist", workspace)))?;
        if ws.owners.iter().chain(ws.members.iter()).any(|u| u == user) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(format!("User '{}' has no access to workspace {}", user, workspace)))
        }
    }

    /// Effective row for a caller-visible uid, or `None` when it is not visible in `ws`.
    fn visible(&self, t: &TableSchema, uid: u32, ws: u32) -> Option<&Row> {
        let row = self.row(&t.name, uid)?;
        match VersionState::classify(row) {
            VersionState::Live { uid } => {
                if is_deleted(t, row) { return None; }
                if ws == 0 { return Some(row); }
                let version = self.tables.get(&t.name)?.values().find(|v| {
                    matches!(VersionState::classify(v),
                        VersionState::Draft { live_uid, workspace, .. } | VersionState::DeletePlaceholder { live_uid, workspace, .. }
                        if live_uid == uid && workspace == ws)
                });
                match version.map(|v| (VersionState::classify(v), v)) {
                    Some((VersionState::DeletePlaceholder { .. }, _)) => None,
                    Some((_, v)) => Some(v),
                    None => Some(row),
                }
            }
            VersionState::NewPlaceholder { workspace, .. } if workspace == ws && !is_deleted(t, row) => Some(row),
            VersionState::Draft { live_uid, workspace, .. } if workspace == ws => self.visible(t, live_uid, ws),
            _ => None,
        }
    }

    fn apply(&mut self, schema: &SchemaRegistry, ws: u32, cmd: Command) -> Result<Outcome, EngineError> {
        let t = schema.table(cmd.table()).ok_or_else(|| EngineError::UnknownTable(cmd.table().to_string()))?;
        if t.ctrl.read_only {
            return Err(EngineError::PermissionDenied(format!("Table '{}' is read-only", t.name)));
        }
        if ws > 0 && !t.ctrl.versioning_ws {
            return Err(EngineError::PermissionDenied(format!("Records of table '{}' cannot be edited in a workspace", t.name)));
        }
        let touched = match cmd {
            Command::Create { pid, placement, values, .. } => Some(self.create(schema, t, ws, pid, placement, values)?),
            Command::Update { uid, values, .. } => Some(self.update(schema, t, ws, uid, values)?),
            Command::Delete { uid, .. } => self.delete(t, ws, uid)?,
            Command::Localize { uid, language, values, .. } => Some(self.localize(schema, t, ws, uid, language, values)?),
        };
        Ok(Outcome { table: t.name.clone(), touched })
    }

    fn create(
        &mut self,
        schema: &SchemaRegistry,
        t: &TableSchema,
        ws: u32,
        pid: u32,
        placement: Placement,
        mut values: Map<String, Value>,
    ) -> Result<u32, EngineError> {
        self.check_parent(schema, t, pid, ws)?;
        if let Some(tf) = t.type_field() {
            if !values.contains_key(tf) {
                if let Some(v) = default_type_value(t) { values.insert(tf.to_string(), v); }
            }
        }
        let subtype = t.type_field().and_then(|tf| values.get(tf)).map(as_text);
        check_required(t, subtype.as_deref(), &values, true)?;

        let uid = self.next_uid(&t.name);
        let mut row = Row::new(uid);
        row.set("pid", json!(pid));
        for col in [t.language_field(), t.translation_parent_field(), t.delete_field()].into_iter().flatten() {
            row.set(col, json!(0));
        }
        if t.ctrl.versioning_ws {
            set_version(&mut row, ws, 0, if ws > 0 { STATE_NEW_PLACEHOLDER } else { STATE_DEFAULT });
        }
        if let Some(sf) = t.ctrl.sortby.as_deref() {
            let language = t.language_field().and_then(|lf| values.get(lf)).and_then(as_i64).unwrap_or(0);
            let sorting = self.sorting_for(t, sf, pid, language, placement, ws)?;
            row.set(sf, json!(sorting));
        }
        self.insert(&t.name, row);
        self.write_values(schema, t, uid, uid, ws, values);
        debug!(target: "cmsbridge::engine", "create table='{}' uid={} pid={} ws={}", t.name, uid, pid, ws);
        Ok(uid)
    }

    fn check_parent(&self, schema: &SchemaRegistry, t: &TableSchema, pid: u32, ws: u32) -> Result<(), EngineError> {
        let err = || EngineError::ParentNotFound { table: t.name.clone(), pid };
        let allowed = match t.ctrl.root_level {
            1 => pid == 0,
            0 => pid != 0,
            _ => true,
        };
        if !allowed { return Err(err()); }
        if pid == 0 { return Ok(()); }
        let pages = schema.table("pages").ok_or_else(err)?;
        self.visible(pages, pid, ws).map(|_| ()).ok_or_else(err)
    }

    /// Visible siblings under `pid` in one language as (uid, sorting), ascending.
    fn siblings(&self, t: &TableSchema, sf: &str, pid: u32, language: i64, ws: u32) -> Vec<(u32, i64)> {
        let Some(rows) = self.tables.get(&t.name) else { return Vec::new(); };
        let lf = t.language_field();
        let mut out: Vec<(u32, i64)> = overlay(rows.values(), t.delete_field(), ws)
            .into_iter()
            .filter(|o| o.row.pid() == pid)
            .filter(|o| lf.map(|f| o.row.int(f) == language).unwrap_or(true))
            .map(|o| (o.uid, o.row.int(sf)))
            .collect();
        out.sort_by_key(|(uid, s)| (*s, *uid));
        out
    }

    fn sorting_for(&mut self, t: &TableSchema, sf: &str, pid: u32, language: i64, placement: Placement, ws: u32) -> Result<i64, EngineError> {
        let siblings = self.siblings(t, sf, pid, language, ws);
        let bottom = siblings.last().map(|s| s.1).unwrap_or(0) + SORT_STEP;
        if siblings.is_empty() { return Ok(SORT_STEP); }
        match placement {
            Placement::Bottom => Ok(bottom),
            Placement::Top => {
                let first = siblings[0].1;
                if first > 1 { return Ok(first / 2); }
                self.resequence(t, sf, &siblings, ws)?;
                Ok(SORT_STEP / 2)
            }
            Placement::After(target) => {
                let Some(idx) = siblings.iter().position(|(uid, _)| *uid == target) else {
                    warn!(target: "cmsbridge::engine", "position target {} not found under pid {} in '{}'; placing at bottom", target, pid, t.name);
                    return Ok(bottom);
                };
                let here = siblings[idx].1;
                match siblings.get(idx + 1) {
                    None => Ok(here + SORT_STEP),
                    Some((_, next)) if next - here > 1 => Ok(here + (next - here) / 2),
                    Some(_) => {
                        self.resequence(t, sf, &siblings, ws)?;
                        Ok((idx as i64 + 1) * SORT_STEP + SORT_STEP / 2)
                    }
                }
            }
        }
    }

    fn resequence(&mut self, t: &TableSchema, sf: &str, siblings: &[(u32, i64)], ws: u32) -> Result<(), EngineError> {
        debug!(target: "cmsbridge::engine", "resequence table='{}' count={}", t.name, siblings.len());
        for (i, (uid, _)) in siblings.iter().enumerate() {
            let mut cols = Map::new();
            cols.insert(sf.to_string(), json!((i as i64 + 1) * SORT_STEP));
            self.set_columns(t, *uid, ws, cols)?;
        }
        Ok(())
    }

    /// Storage uid to write for `uid` in `ws`, creating a workspace version of a live row.
    fn writable_version(&mut self, t: &TableSchema, uid: u32, ws: u32) -> Result<u32, EngineError> {
        let current = self.visible(t, uid, ws)
            .cloned()
            .ok_or_else(|| EngineError::RecordNotFound { table: t.name.clone(), uid })?;
        let live_uid = match VersionState::classify(&current) {
            VersionState::Live { uid } if ws > 0 => uid,
            _ => return Ok(current.uid),
        };
        let draft_uid = self.next_uid(&t.name);
        let mut draft = current;
        draft.uid = draft_uid;
        set_version(&mut draft, ws, live_uid, STATE_DEFAULT);
        self.insert(&t.name, draft);
        self.copy_mm(t, live_uid, draft_uid);
        debug!(target: "cmsbridge::engine", "version {} of '{}':{} created in ws={}", draft_uid, t.name, live_uid, ws);
        Ok(draft_uid)
    }

    fn set_columns(&mut self, t: &TableSchema, uid: u32, ws: u32, cols: Map<String, Value>) -> Result<(), EngineError> {
        let storage = self.writable_version(t, uid, ws)?;
        if let Some(row) = self.tables.get_mut(&t.name).and_then(|m| m.get_mut(&storage)) {
            for (k, v) in cols { row.values.insert(k, v); }
        }
        Ok(())
    }

    fn mm_relations(t: &TableSchema) -> Vec<&MmRelation> {
        t.fields.values()
            .filter_map(|f| f.relation())
            .filter_map(|r| match &r.shape { RelationShape::ManyToMany(mm) => Some(mm), _ => None })
            .collect()
    }

    fn copy_mm(&mut self, t: &TableSchema, from: u32, to: u32) {
        for mm in Self::mm_relations(t) {
            let rows = self.mm.entry(mm.mm_table.clone()).or_default();
            let copies: Vec<MmRow> = rows.iter()
                .filter(|r| r.owner(mm.shape) == from && r.matches(mm))
                .cloned()
                .map(|mut r| { r.set_owner(mm.shape, to); r })
                .collect();
            rows.extend(copies);
        }
    }

    fn replace_mm(&mut self, mm: &MmRelation, owner: u32, targets: &[u32]) {
        let rows = self.mm.entry(mm.mm_table.clone()).or_default();
        rows.retain(|r| !(r.owner(mm.shape) == owner && r.matches(mm)));
        let tablenames = mm.match_fields.get("tablenames").cloned().unwrap_or_default();
        let fieldname = mm.match_fields.get("fieldname").cloned().unwrap_or_default();
        for (i, target) in targets.iter().enumerate() {
            let pos = i as i64 + 1;
            let (uid_local, uid_foreign, sorting, sorting_foreign) = match mm.shape {
                MmShape::Standard => (owner, *target, pos, 0),
                MmShape::Opposite => (*target, owner, 0, pos),
            };
            rows.push(MmRow { uid_local, uid_foreign, tablenames: tablenames.clone(), fieldname: fieldname.clone(), sorting, sorting_foreign });
        }
    }

    /// Write converted values onto `storage_uid`. Junction rows and inline children are
    /// updated alongside; the relation column itself keeps the item count.
    fn write_values(&mut self, schema: &SchemaRegistry, t: &TableSchema, storage_uid: u32, visible_uid: u32, ws: u32, values: Map<String, Value>) {
        let mut columns = Map::new();
        for (col, val) in values.into_iter() {
            let relation = t.field(&col).and_then(|f| f.relation());
            match relation {
                Some(rel) => match &rel.shape {
                    RelationShape::ManyToMany(mm) => {
                        let targets = csv_uids(&val);
                        self.replace_mm(mm, storage_uid, &targets);
                        columns.insert(col, json!(targets.len()));
                    }
                    RelationShape::Inline(inline) => {
                        let children = csv_uids(&val);
                        if let Some(child_table) = rel.foreign_tables.first().and_then(|ft| schema.table(ft)) {
                            for dropped in self.inline_children(child_table, inline, &t.name, visible_uid, ws) {
                                if children.contains(&dropped) { continue; }
                                let mut cols = Map::new();
                                cols.insert(inline.foreign_field.clone(), json!(0));
                                if let Err(e) = self.set_columns(child_table, dropped, ws, cols) {
                                    warn!(target: "cmsbridge::engine", "inline child {}:{} not detached from {}:{}: {}", child_table.name, dropped, t.name, visible_uid, e);
                                }
                            }
                            for (i, child) in children.iter().enumerate() {
                                let mut cols = Map::new();
                                cols.insert(inline.foreign_field.clone(), json!(visible_uid));
                                if let Some(tf) = &inline.foreign_table_field { cols.insert(tf.clone(), json!(t.name)); }
                                if let Some(sf) = &inline.foreign_sortby { cols.insert(sf.clone(), json!(i as i64 + 1)); }
                                if let Err(e) = self.set_columns(child_table, *child, ws, cols) {
                                    warn!(target: "cmsbridge::engine", "inline child {}:{} not attached to {}:{}: {}", child_table.name, child, t.name, visible_uid, e);
                                }
                            }
                        }
                        columns.insert(col, json!(children.len()));
                    }
                    RelationShape::Direct => { columns.insert(col, val); }
                },
                None => { columns.insert(col, val); }
            }
        }
        if let Some(row) = self.tables.get_mut(&t.name).and_then(|m| m.get_mut(&storage_uid)) {
            for (k, v) in columns { row.values.insert(k, v); }
        }
    }

    /// Visible children in `ws` currently pointing at `owner` through `inline`.
    fn inline_children(&self, child_table: &TableSchema, inline: &InlineRelation, owner_table: &str, owner: u32, ws: u32) -> Vec<u32> {
        let Some(rows) = self.tables.get(&child_table.name) else { return Vec::new(); };
        overlay(rows.values(), child_table.delete_field(), ws)
            .into_iter()
            .filter(|o| o.row.int(&inline.foreign_field) == owner as i64)
            .filter(|o| match &inline.foreign_table_field {
                Some(tf) => o.row.get(tf).map(|v| as_text(v) == owner_table).unwrap_or(true),
                None => true,
            })
            .map(|o| o.uid)
            .collect()
    }

    fn update(&mut self, schema: &SchemaRegistry, t: &TableSchema, ws: u32, uid: u32, values: Map<String, Value>) -> Result<u32, EngineError> {
        check_required(t, None, &values, false)?;
        let storage = self.writable_version(t, uid, ws)?;
        let visible = self.row(&t.name, storage).map(|r| VersionState::classify(r).caller_visible_uid()).unwrap_or(uid);
        self.write_values(schema, t, storage, visible, ws, values);
        debug!(target: "cmsbridge::engine", "update table='{}' uid={} storage={} ws={}", t.name, visible, storage, ws);
        Ok(storage)
    }

    fn remove_row(&mut self, t: &TableSchema, uid: u32) {
        if let Some(m) = self.tables.get_mut(&t.name) { m.remove(&uid); }
        for mm in Self::mm_relations(t) {
            if let Some(rows) = self.mm.get_mut(&mm.mm_table) {
                rows.retain(|r| !(r.owner(mm.shape) == uid && r.matches(mm)));
            }
        }
    }

    fn delete(&mut self, t: &TableSchema, ws: u32, uid: u32) -> Result<Option<u32>, EngineError> {
        let Some(current) = self.visible(t, uid, ws).cloned() else {
            debug!(target: "cmsbridge::engine", "delete table='{}' uid={} not visible in ws={}; nothing to do", t.name, uid, ws);
            return Ok(None);
        };
        let state = VersionState::classify(&current);
        let touched = match state {
            VersionState::NewPlaceholder { uid, .. } => {
                self.remove_row(t, uid);
                uid
            }
            VersionState::Live { uid } if ws == 0 => {
                match t.delete_field() {
                    Some(df) => {
                        if let Some(row) = self.tables.get_mut(&t.name).and_then(|m| m.get_mut(&uid)) { row.set(df, json!(1)); }
                    }
                    None => self.remove_row(t, uid),
                }
                uid
            }
            VersionState::Live { uid: live } | VersionState::Draft { live_uid: live, .. } => {
                if let VersionState::Draft { draft_uid, .. } = state { self.remove_row(t, draft_uid); }
                let mut placeholder = self.row(&t.name, live).cloned().unwrap_or(current);
                let ph_uid = self.next_uid(&t.name);
                placeholder.uid = ph_uid;
                set_version(&mut placeholder, ws, live, STATE_DELETE_PLACEHOLDER);
                self.insert(&t.name, placeholder);
                ph_uid
            }
            VersionState::DeletePlaceholder { .. } => return Ok(None),
        };
        debug!(target: "cmsbridge::engine", "delete table='{}' uid={} touched={} ws={}", t.name, uid, touched, ws);
        self.delete_translations(t, state.caller_visible_uid(), ws)?;
        Ok(Some(touched))
    }

    fn delete_translations(&mut self, t: &TableSchema, source: u32, ws: u32) -> Result<(), EngineError> {
        let (Some(lf), Some(tf)) = (t.language_field(), t.translation_parent_field()) else { return Ok(()); };
        let Some(rows) = self.tables.get(&t.name) else { return Ok(()); };
        let translations: Vec<u32> = overlay(rows.values(), t.delete_field(), ws)
            .into_iter()
            .filter(|o| o.row.int(tf) == source as i64 && o.row.int(lf) > 0)
            .map(|o| o.uid)
            .collect();
        for uid in translations { self.delete(t, ws, uid)?; }
        Ok(())
    }

    fn localize(
        &mut self,
        schema: &SchemaRegistry,
        t: &TableSchema,
        ws: u32,
        uid: u32,
        language: i64,
        values: Map<String, Value>,
    ) -> Result<u32, EngineError> {
        let (Some(lf), Some(tf)) = (t.language_field(), t.translation_parent_field()) else {
            return Err(EngineError::InvalidCommand(format!("Localization failed: table '{}' is not localizable", t.name)));
        };
        if language <= 0 {
            return Err(EngineError::InvalidCommand("Localization failed: the target language must not be the default language".into()));
        }
        let source = self.visible(t, uid, ws)
            .cloned()
            .ok_or_else(|| EngineError::RecordNotFound { table: t.name.clone(), uid })?;
        if source.int(lf) != 0 {
            return Err(EngineError::InvalidCommand(format!("Localization failed: record {} of table '{}' is itself a translation", uid, t.name)));
        }
        let existing: Vec<String> = self.tables.get(&t.name)
            .map(|rows| overlay(rows.values(), t.delete_field(), ws)
                .into_iter()
                .filter(|o| o.row.int(tf) == uid as i64 && o.row.int(lf) == language)
                .map(|o| o.uid.to_string())
                .collect())
            .unwrap_or_default();
        if !existing.is_empty() {
            return Err(EngineError::AlreadyLocalized { table: t.name.clone(), uid, language, existing: existing.join(",") });
        }
        check_required(t, None, &values, false)?;
        let new_uid = self.next_uid(&t.name);
        let mut row = source.clone();
        row.uid = new_uid;
        row.set(lf, json!(language));
        row.set(tf, json!(uid));
        if t.ctrl.versioning_ws {
            set_version(&mut row, ws, 0, if ws > 0 { STATE_NEW_PLACEHOLDER } else { STATE_DEFAULT });
        }
        self.insert(&t.name, row);
        self.copy_mm(t, source.uid, new_uid);
        self.write_values(schema, t, new_uid, new_uid, ws, values);
        debug!(target: "cmsbridge::engine", "localize table='{}' uid={} language={} -> {} ws={}", t.name, uid, language, new_uid, ws);
        Ok(new_uid)
    }
}
