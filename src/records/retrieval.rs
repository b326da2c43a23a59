//! Read path: lookup, filtering, pagination, translation fallback and projection.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::filter::Filter;
use super::relations::{RelationResolver, Resolved};
use super::session::{Session, VisibleRecord};
use crate::error::{AppError, AppResult};
use crate::schema::{FieldConfig, FieldKind, TableSchema};
use crate::values::{as_i64, as_text, date_value, is_blank};

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct ReadQuery {
    pub table: String,
    pub uid: Option<u32>,
    pub pid: Option<u32>,
    pub filter: Option<String>,
    pub limit: usize,
    pub offset: usize,
    /// Explicit projection; `None` selects the default field set.
    pub fields: Option<Vec<String>>,
    pub language: Option<i64>,
    pub include_translation_source: bool,
    pub include_relations: bool,
}

impl ReadQuery {
    pub fn new(table: impl Into<String>) -> Self {
        ReadQuery {
            table: table.into(),
            uid: None,
            pid: None,
            filter: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
            fields: None,
            language: None,
            include_translation_source: false,
            include_relations: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadResult {
    pub table: String,
    pub records: Vec<Map<String, Value>>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub has_more: bool,
}

/// Columns a filter may name besides schema fields.
const SYSTEM_COLUMNS: &[&str] = &["uid", "pid"];

pub struct RecordReader<'a> {
    session: &'a Session,
}

impl<'a> RecordReader<'a> {
    pub fn new(session: &'a Session) -> Self { Self { session } }

    pub fn read(&self, q: &ReadQuery) -> AppResult<ReadResult> {
        let t = self.session.addressable_table(&q.table)?;
        if q.limit == 0 || q.limit > MAX_LIMIT {
            return Err(AppError::invalid_param("limit", format!("Parameter \"limit\" must be between 1 and {}", MAX_LIMIT)));
        }
        let filter = match q.filter.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(src) => Some(self.parse_filter(t, src)?),
            None => None,
        };

        let lf = t.language_field();
        let mut matched: Vec<VisibleRecord> = self.session.records(t)
            .into_iter()
            .filter(|r| q.uid.map(|u| r.uid == u).unwrap_or(true))
            .filter(|r| q.pid.map(|p| r.row.pid() == p).unwrap_or(true))
            .filter(|r| match (q.language, lf) {
                (Some(lang), Some(f)) => r.int(f) == lang,
                _ => true,
            })
            .filter(|r| filter.as_ref().map(|f| f.matches(&|c: &str| r.value(c))).unwrap_or(true))
            .collect();
        let sf = t.sort_field();
        matched.sort_by(|a, b| {
            let by_field = sf.map(|f| compare_values(a.row.get(f), b.row.get(f))).unwrap_or(Ordering::Equal);
            by_field.then(a.uid.cmp(&b.uid))
        });

        let total = matched.len();
        let page: Vec<VisibleRecord> = matched.into_iter().skip(q.offset).take(q.limit).collect();
        let has_more = q.offset + page.len() < total;
        debug!(target: "cmsbridge::read", "read table='{}' ws={} total={} returned={}", t.name, self.session.workspace(), total, page.len());
        let records = page.iter().map(|r| self.project(t, r, q)).collect();
        Ok(ReadResult { table: t.name.clone(), records, total, limit: q.limit, offset: q.offset, has_more })
    }

    fn parse_filter(&self, t: &TableSchema, src: &str) -> AppResult<Filter> {
        let mut filter = Filter::parse(src).map_err(|e| AppError::invalid_param("where", e.to_string()))?;
        for col in filter.columns() {
            let known = SYSTEM_COLUMNS.contains(&col)
                || t.sort_field() == Some(col)
                || (t.field(col).is_some() && self.session.access().can_access_field(&t.name, col));
            if !known {
                return Err(AppError::invalid_param("where", format!("Unknown column '{}' in filter for table '{}'", col, t.name)));
            }
        }
        filter
            .bind_dates(&|c: &str| t.field(c).map(|f| f.is_date()).unwrap_or(false))
            .map_err(|e| AppError::invalid_param("where", e.to_string()))?;
        Ok(filter)
    }

    /// Field names returned for `rec`, in output order, without `uid`.
    fn projected_fields<'t>(&self, t: &'t TableSchema, rec: &VisibleRecord, q: &ReadQuery) -> Vec<&'t str> {
        let access = self.session.access();
        let mut out: Vec<&str> = Vec::new();
        if let Some(requested) = &q.fields {
            for name in requested {
                if name == "uid" { continue; }
                let name = match t.fields.get_key_value(name.as_str()) {
                    Some((k, _)) if access.can_access_field(&t.name, k) => k.as_str(),
                    _ if name == "pid" => "pid",
                    // inaccessible and unknown names are dropped
                    _ => continue,
                };
                if !out.contains(&name) { out.push(name); }
            }
            return out;
        }
        out.push("pid");
        for f in [t.type_field(), t.language_field()].into_iter().flatten() {
            if t.field(f).is_some() && !out.contains(&f) { out.push(f); }
        }
        let subtype = t.type_field().and_then(|tf| rec.row.get(tf)).map(as_text);
        for f in access.available_fields(&t.name, subtype.as_deref()) {
            if f.is_relation() && !q.include_relations { continue; }
            let Some((name, _)) = t.fields.get_key_value(f.name.as_str()) else { continue; };
            if !out.contains(&name.as_str()) { out.push(name.as_str()); }
        }
        out
    }

    pub fn project(&self, t: &TableSchema, rec: &VisibleRecord, q: &ReadQuery) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("uid".into(), json!(rec.uid));
        let source = self.translation_source(t, rec);
        let mut inherited: Vec<&str> = Vec::new();
        let mut translated: Vec<&str> = Vec::new();
        let structural = [t.language_field(), t.translation_parent_field(), t.type_field(), Some("pid")];

        for name in self.projected_fields(t, rec, q) {
            let Some(field) = t.field(name) else {
                out.insert(name.to_string(), rec.value(name).unwrap_or(Value::Null));
                continue;
            };
            let own = rec.row.get(name);
            let from_source = match &source {
                Some(src) if !structural.contains(&Some(name)) && !field.is_relation() => {
                    (field.inherits_from_source() || own.map(is_blank).unwrap_or(true)).then_some(src)
                }
                _ => None,
            };
            if source.is_some() && !structural.contains(&Some(name)) && !field.is_relation() {
                if from_source.is_some() { inherited.push(name); } else { translated.push(name); }
            }
            let value = match from_source {
                Some(src) => self.output_value(t, field, src),
                None => self.output_value(t, field, rec),
            };
            out.insert(name.to_string(), value);
        }

        if q.include_translation_source {
            if let Some(src) = &source {
                let lf = t.language_field().unwrap_or("sys_language_uid");
                let language = src.int(lf);
                let language = match self.session.languages().iso_code_from_uid(language) {
                    Some(code) => json!(code),
                    None => json!(language),
                };
                out.insert("_translationSource".into(), json!({
                    "uid": src.uid,
                    "language": language,
                    "inheritedFields": inherited,
                    "translatedFields": translated,
                }));
            }
        }
        out
    }

    fn translation_source(&self, t: &TableSchema, rec: &VisibleRecord) -> Option<VisibleRecord> {
        let (lf, tf) = (t.language_field()?, t.translation_parent_field()?);
        if rec.int(lf) <= 0 { return None; }
        let parent = rec.int(tf);
        if parent <= 0 { return None; }
        self.session.record(t, parent as u32)
    }

    fn output_value(&self, t: &TableSchema, field: &FieldConfig, rec: &VisibleRecord) -> Value {
        let raw = rec.row.get(&field.name);
        match &field.kind {
            FieldKind::Date => raw.map(date_value).unwrap_or(Value::Null),
            FieldKind::Check => json!(raw.and_then(as_i64).unwrap_or(0)),
            FieldKind::Select { multiple: true, .. } => {
                let items: Vec<String> = raw.map(as_text).unwrap_or_default()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                json!(items)
            }
            FieldKind::Relation(_) => {
                let resolver = RelationResolver::new(self.session);
                match resolver.resolve(t, field, rec) {
                    Some(Resolved::Uids(uids)) => json!(uids),
                    Some(Resolved::Refs(refs)) => Value::Array(refs.into_iter().map(|(table, uid)| json!({"table": table, "uid": uid})).collect()),
                    Some(Resolved::Embedded { table, records }) => self.embed(&table, &records),
                    None => Value::Array(Vec::new()),
                }
            }
            _ => raw.cloned().unwrap_or(Value::Null),
        }
    }

    /// Child records in their default projection, without nested relations.
    fn embed(&self, table: &str, records: &[VisibleRecord]) -> Value {
        let Some(child) = self.session.schema().table(table) else { return Value::Array(Vec::new()); };
        let q = ReadQuery::new(table);
        Value::Array(records.iter().map(|r| Value::Object(self.project(child, r, &q))).collect())
    }
}

/// Numeric when both values are numeric, text otherwise; missing values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (as_i64(x), as_i64(y)) {
            (Some(i), Some(j)) => i.cmp(&j),
            _ => as_text(x).cmp(&as_text(y)),
        },
    }
}
