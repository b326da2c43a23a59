//! Workspace version state of a stored row.

use std::collections::HashMap;

use super::Row;

pub const WSID: &str = "t3ver_wsid";
pub const OID: &str = "t3ver_oid";
pub const STATE: &str = "t3ver_state";

pub const STATE_DEFAULT: i64 = 0;
pub const STATE_NEW_PLACEHOLDER: i64 = 1;
pub const STATE_DELETE_PLACEHOLDER: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Live { uid: u32 },
    /// Workspace version of a live row.
    Draft { live_uid: u32, draft_uid: u32, workspace: u32 },
    /// Record that exists only in `workspace`.
    NewPlaceholder { uid: u32, workspace: u32 },
    /// Marks `live_uid` as deleted in `workspace`.
    DeletePlaceholder { live_uid: u32, uid: u32, workspace: u32 },
}

impl VersionState {
    pub fn classify(row: &Row) -> Self {
        let workspace = row.int(WSID).max(0) as u32;
        if workspace == 0 {
            return VersionState::Live { uid: row.uid };
        }
        let oid = row.int(OID).max(0) as u32;
        match row.int(STATE) {
            STATE_NEW_PLACEHOLDER => VersionState::NewPlaceholder { uid: row.uid, workspace },
            STATE_DELETE_PLACEHOLDER => VersionState::DeletePlaceholder { live_uid: oid, uid: row.uid, workspace },
            // version without a live counterpart behaves like a placeholder
            _ if oid == 0 => VersionState::NewPlaceholder { uid: row.uid, workspace },
            _ => VersionState::Draft { live_uid: oid, draft_uid: row.uid, workspace },
        }
    }

    /// Identifier handed to callers: the live uid for versions, the own uid for placeholders.
    pub fn caller_visible_uid(&self) -> u32 {
        match *self {
            VersionState::Live { uid } => uid,
            VersionState::Draft { live_uid, .. } => live_uid,
            VersionState::NewPlaceholder { uid, .. } => uid,
            VersionState::DeletePlaceholder { live_uid, .. } => live_uid,
        }
    }

    /// Workspace the row belongs to; 0 for live rows.
    pub fn workspace(&self) -> u32 {
        match *self {
            VersionState::Live { .. } => 0,
            VersionState::Draft { workspace, .. }
            | VersionState::NewPlaceholder { workspace, .. }
            | VersionState::DeletePlaceholder { workspace, .. } => workspace,
        }
    }

    pub fn is_live(&self) -> bool { matches!(self, VersionState::Live { .. }) }
}

/// A row as seen from one workspace, addressed by its caller-visible uid.
#[derive(Debug, Clone, Copy)]
pub struct Overlaid<'a> {
    pub uid: u32,
    pub state: VersionState,
    /// Storage row holding the effective values.
    pub row: &'a Row,
}

/// Effective rows of one table inside `workspace`: live rows replaced by their workspace
/// version, delete-placeholdered and soft-deleted rows dropped, and placeholders of
/// `workspace` added. Input order is kept.
pub fn overlay<'a, I>(rows: I, delete_field: Option<&str>, workspace: u32) -> Vec<Overlaid<'a>>
where
    I: IntoIterator<Item = &'a Row>,
{
    let rows: Vec<&Row> = rows.into_iter().collect();
    let deleted = |r: &Row| delete_field.map(|f| r.int(f) != 0).unwrap_or(false);
    let mut versions: HashMap<u32, &Row> = HashMap::new();
    if workspace > 0 {
        for r in rows.iter() {
            match VersionState::classify(r) {
                VersionState::Draft { live_uid, workspace: ws, .. }
                | VersionState::DeletePlaceholder { live_uid, workspace: ws, .. } if ws == workspace => {
                    versions.insert(live_uid, *r);
                }
                _ => {}
            }
        }
    }
    let mut out = Vec::with_capacity(rows.len());
    for r in rows {
        match VersionState::classify(r) {
            VersionState::Live { uid } if !deleted(r) => match versions.get(&uid) {
                Some(v) => {
                    let state = VersionState::classify(v);
                    if matches!(state, VersionState::DeletePlaceholder { .. }) || deleted(v) { continue; }
                    out.push(Overlaid { uid, state, row: *v });
                }
                None => out.push(Overlaid { uid, state: VersionState::Live { uid }, row: r }),
            },
            VersionState::NewPlaceholder { uid, workspace: ws } if ws == workspace && !deleted(r) => {
                out.push(Overlaid { uid, state: VersionState::NewPlaceholder { uid, workspace: ws }, row: r });
            }
            _ => {}
        }
    }
    out
}
