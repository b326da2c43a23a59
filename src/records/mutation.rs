//! Write path: create, update, delete and translate through the engine's changeset API.
//!
//! Input is validated and converted before anything is submitted, so a rejected field map
//! never reaches storage. Whatever row the engine reports back is mapped to the
//! caller-visible uid, which stays the same across version churn in the workspace.

use std::str::FromStr;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::session::{Session, VisibleRecord};
use crate::engine::{Command, Placement};
use crate::error::{AppError, AppResult};
use crate::schema::TableSchema;
use crate::validation::{ValidationErrors, WriteMode};
use crate::values::{as_i64, as_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Create,
    Update,
    Delete,
    Translate,
}

impl FromStr for WriteAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(WriteAction::Create),
            "update" => Ok(WriteAction::Update),
            "delete" => Ok(WriteAction::Delete),
            "translate" => Ok(WriteAction::Translate),
            other => Err(AppError::invalid_param(
                "action",
                format!("Unknown action '{}'. Valid actions: create, update, delete, translate", other),
            )),
        }
    }
}

/// Requested placement of a new record among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Top,
    Bottom,
    Before(u32),
    After(u32),
}

impl Position {
    /// Parse `top`, `bottom`, `before:<uid>` or `after:<uid>`. Anything else places the
    /// record at the bottom.
    pub fn parse(raw: Option<&str>) -> Position {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else { return Position::Bottom; };
        let lower = raw.to_ascii_lowercase();
        let parsed = match lower.split_once(':') {
            None if lower == "top" => Some(Position::Top),
            None if lower == "bottom" => Some(Position::Bottom),
            Some(("before", uid)) => uid.trim().parse::<u32>().ok().filter(|u| *u > 0).map(Position::Before),
            Some(("after", uid)) => uid.trim().parse::<u32>().ok().filter(|u| *u > 0).map(Position::After),
            _ => None,
        };
        parsed.unwrap_or_else(|| {
            warn!(target: "cmsbridge::write", "invalid position '{}', placing record at the bottom", raw);
            Position::Bottom
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailedRecord {
    pub uid: u32,
    pub error: String,
}

/// Result of a batch call; one record failing never stops the others.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct BatchOutcome {
    pub succeeded: Vec<u32>,
    pub failed: Vec<FailedRecord>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool { self.failed.is_empty() }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub source_uid: u32,
    pub target_language: String,
    pub translation_uid: u32,
}

pub struct RecordWriter<'a> {
    session: &'a Session,
}

impl<'a> RecordWriter<'a> {
    pub fn new(session: &'a Session) -> Self { Self { session } }

    pub fn create(&self, table: &str, pid: u32, data: &Map<String, Value>, position: Option<&str>) -> AppResult<u32> {
        let t = self.session.table(table)?;
        // record type filtering only applies when the caller names the type
        let subtype = t.type_field().and_then(|tf| data.get(tf)).map(as_text);
        let values = self.session.validator().validate(t, subtype.as_deref(), data, WriteMode::Create)?;
        let language = t.language_field().and_then(|lf| values.get(lf)).and_then(as_i64).unwrap_or(0);
        let placement = self.placement(t, pid, language, Position::parse(position));
        let outcome = self.session.submit(Command::Create { table: t.name.clone(), pid, placement, values })?;
        let storage = outcome.touched
            .ok_or_else(|| AppError::internal("engine_no_uid".to_string(), format!("Engine did not report the created record of table '{}'", t.name)))?;
        let uid = self.session.visible_uid(&t.name, storage);
        debug!(target: "cmsbridge::write", "created {}:{} (storage {}) ws={}", t.name, uid, storage, self.session.workspace());
        Ok(uid)
    }

    fn placement(&self, t: &TableSchema, pid: u32, language: i64, position: Position) -> Placement {
        match position {
            Position::Top => Placement::Top,
            Position::Bottom => Placement::Bottom,
            Position::After(uid) => Placement::After(uid),
            Position::Before(uid) => {
                let Some(sf) = t.sort_field() else { return Placement::Bottom; };
                let lf = t.language_field();
                let mut siblings: Vec<(i64, u32)> = self.session.records(t)
                    .into_iter()
                    .filter(|r| r.row.pid() == pid)
                    .filter(|r| lf.map(|f| r.int(f) == language).unwrap_or(true))
                    .map(|r| (r.int(sf), r.uid))
                    .collect();
                siblings.sort();
                match siblings.iter().position(|(_, u)| *u == uid) {
                    Some(0) => Placement::Top,
                    Some(i) => Placement::After(siblings[i - 1].1),
                    None => {
                        warn!(target: "cmsbridge::write", "position target {} not found under pid {}, placing record at the bottom", uid, pid);
                        Placement::Bottom
                    }
                }
            }
        }
    }

    fn existing(&self, t: &TableSchema, uid: u32) -> AppResult<VisibleRecord> {
        self.session.record(t, uid).ok_or_else(|| {
            AppError::not_found("record_not_found".to_string(), format!("Record {} of table '{}' was not found", uid, t.name))
        })
    }

    pub fn update(&self, table: &str, uid: u32, data: &Map<String, Value>) -> AppResult<u32> {
        let t = self.session.table(table)?;
        self.update_in(t, uid, data)
    }

    fn update_in(&self, t: &TableSchema, uid: u32, data: &Map<String, Value>) -> AppResult<u32> {
        let current = self.existing(t, uid)?;
        let subtype = t.type_field()
            .and_then(|tf| data.get(tf).or_else(|| current.row.get(tf)))
            .map(as_text);
        let values = self.session.validator().validate(t, subtype.as_deref(), data, WriteMode::Update)?;
        let outcome = self.session.submit(Command::Update { table: t.name.clone(), uid, values })?;
        let visible = outcome.touched.map(|s| self.session.visible_uid(&t.name, s)).unwrap_or(uid);
        debug!(target: "cmsbridge::write", "updated {}:{} ws={}", t.name, visible, self.session.workspace());
        Ok(visible)
    }

    /// Update every uid independently.
    pub fn update_many(&self, table: &str, uids: &[u32], data: &Map<String, Value>) -> AppResult<BatchOutcome> {
        let t = self.session.table(table)?;
        let mut out = BatchOutcome::default();
        for uid in uids {
            match self.update_in(t, *uid, data) {
                Ok(u) => out.succeeded.push(u),
                Err(e) => {
                    debug!(target: "cmsbridge::write", "batch update of {}:{} failed: {}", t.name, uid, e);
                    out.failed.push(FailedRecord { uid: *uid, error: e.message().to_string() });
                }
            }
        }
        Ok(out)
    }

    /// Delete `uid`; records that are not visible succeed without effect.
    pub fn delete(&self, table: &str, uid: u32) -> AppResult<u32> {
        let t = self.session.table(table)?;
        self.delete_in(t, uid)
    }

    fn delete_in(&self, t: &TableSchema, uid: u32) -> AppResult<u32> {
        let outcome = self.session.submit(Command::Delete { table: t.name.clone(), uid })?;
        match outcome.touched {
            Some(storage) => debug!(target: "cmsbridge::write", "deleted {}:{} (storage {}) ws={}", t.name, uid, storage, self.session.workspace()),
            None => debug!(target: "cmsbridge::write", "delete of {}:{} had nothing to do", t.name, uid),
        }
        Ok(uid)
    }

    pub fn delete_many(&self, table: &str, uids: &[u32]) -> AppResult<BatchOutcome> {
        let t = self.session.table(table)?;
        let mut out = BatchOutcome::default();
        for uid in uids {
            match self.delete_in(t, *uid) {
                Ok(u) => out.succeeded.push(u),
                Err(e) => out.failed.push(FailedRecord { uid: *uid, error: e.message().to_string() }),
            }
        }
        Ok(out)
    }

    /// Translate `uid` into the language named by the language field in `data`. The other
    /// entries of `data` are applied to the new translation.
    pub fn translate(&self, table: &str, uid: u32, data: &Map<String, Value>) -> AppResult<Translation> {
        let t = self.session.table(table)?;
        let (Some(lf), Some(tf)) = (t.language_field(), t.translation_parent_field()) else {
            return Err(AppError::user("not_translatable".to_string(), format!("Table '{}' is not translatable", t.name)));
        };
        let token = data.get(lf).ok_or_else(|| {
            AppError::invalid_param("data", format!("Translation requires the target language in data.{}", lf))
        })?;
        let language = self.session.languages()
            .resolve(token)
            .map_err(|e| AppError::from(ValidationErrors::single(e.in_field(lf))))?;
        if language <= 0 {
            return Err(AppError::user("invalid_language".to_string(), "Cannot translate into the default language".to_string()));
        }
        let target_code = self.session.languages()
            .iso_code_from_uid(language)
            .map(|s| s.to_string())
            .unwrap_or_else(|| language.to_string());

        let source = self.existing(t, uid)?;
        // -1 (all languages) counts as a translation too
        if source.int(lf) != 0 {
            return Err(AppError::user(
                "chained_translation".to_string(),
                format!("Record {} of table '{}' is itself a translation and cannot be translated", uid, t.name),
            ));
        }
        let existing: Vec<String> = self.session.records(t)
            .into_iter()
            .filter(|r| r.int(tf) == uid as i64 && r.int(lf) == language)
            .map(|r| r.uid.to_string())
            .collect();
        if !existing.is_empty() {
            return Err(AppError::conflict(
                "translation_exists".to_string(),
                format!("A translation of record {} to language '{}' already exists (uid {})", uid, target_code, existing.join(", ")),
            ));
        }

        let mut rest = data.clone();
        rest.remove(lf);
        let subtype = t.type_field().and_then(|f| source.row.get(f)).map(as_text);
        let values = self.session.validator().validate(t, subtype.as_deref(), &rest, WriteMode::Translate)?;

        let outcome = self.session.submit(Command::Localize { table: t.name.clone(), uid, language, values })?;
        let storage = outcome.touched
            .ok_or_else(|| AppError::internal("engine_no_uid".to_string(), format!("Engine did not report the translation of {}:{}", t.name, uid)))?;
        let translation_uid = self.session.visible_uid(&t.name, storage);
        debug!(target: "cmsbridge::write", "translated {}:{} to '{}' as {}", t.name, uid, target_code, translation_uid);
        Ok(Translation { source_uid: uid, target_language: target_code, translation_uid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_parse_and_degrade_to_bottom() {
        assert_eq!(Position::parse(None), Position::Bottom);
        assert_eq!(Position::parse(Some("top")), Position::Top);
        assert_eq!(Position::parse(Some(" Bottom ")), Position::Bottom);
        assert_eq!(Position::parse(Some("before:12")), Position::Before(12));
        assert_eq!(Position::parse(Some("after: 7")), Position::After(7));
        assert_eq!(Position::parse(Some("after:0")), Position::Bottom);
        assert_eq!(Position::parse(Some("sideways")), Position::Bottom);
        assert_eq!(Position::parse(Some("before:abc")), Position::Bottom);
    }

    #[test]
    fn unknown_action_is_a_parameter_error() {
        assert_eq!("Create".parse::<WriteAction>().unwrap(), WriteAction::Create);
        let err = "publish".parse::<WriteAction>().unwrap_err();
        assert_eq!(err.code_str(), "invalid_param:action");
        assert!(err.message().contains("publish"));
    }
}
