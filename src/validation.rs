//! Field validation and conversion for record writes.
//!
//! `FieldValidator::validate` checks a proposed field map against the schema of a table and
//! record type, converts values into their stored form (CSV for multi-value fields, epoch
//! seconds for dates, numeric ids for languages) and collects every error instead of
//! stopping at the first one. Nothing here touches storage.

use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

use crate::access::TableAccess;
use crate::language::LanguageMapping;
use crate::schema::{FieldConfig, FieldKind, TableSchema};
use crate::values::{as_i64, iso_to_epoch};

fn field_prefix(field: &Option<String>) -> String {
    match field {
        Some(f) => format!("Field '{}': ", f),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FieldError {
    #[error("Field 'uid' cannot be set; record identifiers are assigned by the system")]
    IdentifierNotWritable,
    #[error("Field 'pid' cannot be changed on update; the parent is only set at creation")]
    ParentNotWritable,
    #[error("Field '{field}' does not exist in table '{table}'")]
    UnknownField { table: String, field: String },
    #[error("Field '{field}' is not accessible")]
    NotAccessible { field: String },
    #[error("Field '{field}': File fields are not supported")]
    FileFieldUnsupported { field: String },
    #[error("Field '{field}' is not available for this record type ('{subtype}')")]
    NotAvailableForType { field: String, subtype: String },
    #[error("Field '{field}' exceeds the maximum length of {max} characters (got {actual})")]
    TooLong { field: String, max: usize, actual: usize },
    #[error("Field '{field}' has invalid value '{value}'. Allowed values: {allowed}")]
    InvalidChoice { field: String, value: String, allowed: String },
    #[error("Field '{field}' {reason}")]
    InvalidRelation { field: String, reason: String },
    #[error("{}Unknown language code: {code}. Available codes: {available}", field_prefix(.field))]
    UnknownLanguage { field: Option<String>, code: String, available: String },
    #[error("Field '{field}' expects an ISO-8601 date, got '{value}'")]
    InvalidDate { field: String, value: String },
    #[error("Field '{field}' expects a {expected} value")]
    InvalidType { field: String, expected: &'static str },
}

impl FieldError {
    pub(crate) fn in_field(self, name: &str) -> Self {
        match self {
            FieldError::UnknownLanguage { field: None, code, available } => {
                FieldError::UnknownLanguage { field: Some(name.to_string()), code, available }
            }
            other => other,
        }
    }
}

/// Every error found for one field map.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn single(e: FieldError) -> Self { ValidationErrors(vec![e]) }
    pub fn errors(&self) -> &[FieldError] { &self.0 }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
    Translate,
}

const REL_SHAPE: &str = "must be an array of UIDs";
const REL_POSITIVE: &str = "must contain only positive integer UIDs";

pub struct FieldValidator<'a> {
    access: &'a TableAccess,
    languages: &'a LanguageMapping,
}

impl<'a> FieldValidator<'a> {
    pub fn new(access: &'a TableAccess, languages: &'a LanguageMapping) -> Self {
        Self { access, languages }
    }

    /// Validate `data` for `table`. A `subtype` of `None` skips record type filtering.
    pub fn validate(
        &self,
        table: &TableSchema,
        subtype: Option<&str>,
        data: &Map<String, Value>,
        mode: WriteMode,
    ) -> Result<Map<String, Value>, ValidationErrors> {
        let mut out = Map::new();
        let mut errors = Vec::new();
        let type_key = subtype.and_then(|s| table.resolve_type_key(Some(s)));
        for (name, value) in data.iter() {
            match name.as_str() {
                "uid" => { errors.push(FieldError::IdentifierNotWritable); continue; }
                "pid" if mode != WriteMode::Create => { errors.push(FieldError::ParentNotWritable); continue; }
                // placement on create comes from the top-level parameter
                "pid" => continue,
                _ => {}
            }
            let Some(field) = table.field(name) else {
                errors.push(FieldError::UnknownField { table: table.name.clone(), field: name.clone() });
                continue;
            };
            if field.is_file() {
                errors.push(FieldError::FileFieldUnsupported { field: name.clone() });
                continue;
            }
            if !self.access.can_access_field(&table.name, name) {
                errors.push(FieldError::NotAccessible { field: name.clone() });
                continue;
            }
            if let Some(key) = type_key {
                if !table.is_field_in_type(Some(key), name) {
                    errors.push(FieldError::NotAvailableForType { field: name.clone(), subtype: key.to_string() });
                    continue;
                }
            }
            match self.convert(field, value) {
                Ok(v) => { out.insert(name.clone(), v); }
                Err(mut errs) => errors.append(&mut errs),
            }
        }
        if errors.is_empty() { Ok(out) } else { Err(ValidationErrors(errors)) }
    }

    fn convert(&self, field: &FieldConfig, value: &Value) -> Result<Value, Vec<FieldError>> {
        let name = field.name.as_str();
        let wrong = |expected: &'static str| vec![FieldError::InvalidType { field: name.to_string(), expected }];
        match &field.kind {
            FieldKind::Text { max } => {
                let s = match value {
                    Value::Null => String::new(),
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return Err(wrong("text")),
                };
                let len = s.chars().count();
                match max {
                    Some(m) if len > *m => Err(vec![FieldError::TooLong { field: name.to_string(), max: *m, actual: len }]),
                    _ => Ok(Value::String(s)),
                }
            }
            FieldKind::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::String(s) => {
                    let t = s.trim();
                    if let Ok(i) = t.parse::<i64>() { return Ok(Value::from(i)); }
                    match t.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                        Some(n) => Ok(Value::Number(n)),
                        None => Err(wrong("numeric")),
                    }
                }
                _ => Err(wrong("numeric")),
            },
            FieldKind::Date => match value {
                Value::Null => Ok(Value::from(0)),
                Value::Number(n) if n.as_i64().is_some() => Ok(value.clone()),
                Value::String(s) if s.trim().is_empty() => Ok(Value::from(0)),
                Value::String(s) => iso_to_epoch(s)
                    .map(Value::from)
                    .ok_or_else(|| vec![FieldError::InvalidDate { field: name.to_string(), value: s.clone() }]),
                other => Err(vec![FieldError::InvalidDate { field: name.to_string(), value: other.to_string() }]),
            },
            FieldKind::Check => match value {
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::from(1)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::from(0)),
                other => as_i64(other).map(Value::from).ok_or_else(|| wrong("checkbox")),
            },
            FieldKind::Select { items, multiple } => self.convert_select(name, items, *multiple, value),
            FieldKind::Language => self.languages.resolve(value).map(Value::from).map_err(|e| vec![e.in_field(name)]),
            FieldKind::Relation(rel) => convert_relation(name, rel.foreign_tables.len() > 1, value),
            FieldKind::Passthrough => Ok(value.clone()),
            FieldKind::File => Err(vec![FieldError::FileFieldUnsupported { field: name.to_string() }]),
        }
    }

    fn convert_select(&self, name: &str, items: &[String], multiple: bool, value: &Value) -> Result<Value, Vec<FieldError>> {
        let scalar = |v: &Value| -> Option<String> {
            match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        let invalid = |v: String| FieldError::InvalidChoice { field: name.to_string(), value: v, allowed: items.join(", ") };
        // items filled at runtime by the CMS are not known here
        let check = |v: &str| items.is_empty() || items.iter().any(|i| i == v);
        if multiple {
            let parts: Vec<String> = match value {
                Value::Array(a) => {
                    let mut parts = Vec::with_capacity(a.len());
                    for v in a {
                        match scalar(v) {
                            Some(s) => parts.push(s),
                            None => return Err(vec![FieldError::InvalidType { field: name.to_string(), expected: "list of strings" }]),
                        }
                    }
                    parts
                }
                Value::Null => Vec::new(),
                other => match scalar(other) {
                    Some(s) => s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect(),
                    None => return Err(vec![FieldError::InvalidType { field: name.to_string(), expected: "list of strings" }]),
                },
            };
            let bad: Vec<FieldError> = parts.iter().filter(|p| !check(p)).map(|p| invalid(p.clone())).collect();
            if !bad.is_empty() { return Err(bad); }
            return Ok(Value::String(parts.join(",")));
        }
        match scalar(value) {
            Some(s) if check(&s) => Ok(value.clone()),
            Some(s) => Err(vec![invalid(s)]),
            None => Err(vec![FieldError::InvalidType { field: name.to_string(), expected: "single scalar" }]),
        }
    }
}

fn convert_relation(name: &str, multi_table: bool, value: &Value) -> Result<Value, Vec<FieldError>> {
    let err = |reason: &str| vec![FieldError::InvalidRelation { field: name.to_string(), reason: reason.to_string() }];
    let entry = |v: &Value| -> Result<String, &'static str> {
        match v {
            Value::Number(n) => match n.as_i64() {
                Some(i) if i > 0 => Ok(i.to_string()),
                _ => Err(REL_POSITIVE),
            },
            Value::String(s) => {
                let t = s.trim();
                match t.parse::<i64>() {
                    Ok(i) if i > 0 => Ok(i.to_string()),
                    Ok(_) => Err(REL_POSITIVE),
                    // table_uid form on fields allowing several tables
                    Err(_) if multi_table => match t.rsplit_once('_').map(|(tb, u)| (tb, u.parse::<i64>())) {
                        Some((tb, Ok(i))) if i > 0 && !tb.is_empty() => Ok(t.to_string()),
                        _ => Err(REL_POSITIVE),
                    },
                    Err(_) => Err(REL_POSITIVE),
                }
            }
            Value::Object(o) if multi_table => {
                let table = o.get("table").and_then(|t| t.as_str());
                let uid = o.get("uid").and_then(as_i64);
                match (table, uid) {
                    (Some(t), Some(u)) if u > 0 => Ok(format!("{}_{}", t, u)),
                    _ => Err(REL_POSITIVE),
                }
            }
            _ => Err(REL_POSITIVE),
        }
    };
    let items: Vec<Value> = match value {
        Value::Array(a) => a.clone(),
        Value::Null => Vec::new(),
        Value::Number(_) => vec![value.clone()],
        Value::String(s) if s.trim().is_empty() => Vec::new(),
        Value::String(s) => {
            let parts: Vec<&str> = s.split(',').map(|p| p.trim()).collect();
            if !parts.iter().all(|p| p.parse::<i64>().is_ok() || (multi_table && p.contains('_'))) {
                return Err(err(REL_SHAPE));
            }
            parts.into_iter().map(|p| Value::String(p.to_string())).collect()
        }
        _ => return Err(err(REL_SHAPE)),
    };
    let mut out = Vec::with_capacity(items.len());
    for v in items.iter() {
        match entry(v) {
            Ok(s) => out.push(s),
            Err(reason) => return Err(err(reason)),
        }
    }
    Ok(Value::String(out.join(",")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessRules;
    use crate::language::Site;
    use crate::schema::SchemaRegistry;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture { access: TableAccess, languages: LanguageMapping }

    fn fixture() -> Fixture {
        let reg = SchemaRegistry::from_json_str(include_str!("../tests/fixtures/schema.json")).unwrap();
        let sites: Vec<Site> = serde_json::from_str(include_str!("../tests/fixtures/sites.json")).unwrap();
        Fixture {
            access: TableAccess::new(Arc::new(reg), AccessRules::default(), false),
            languages: LanguageMapping::from_sites(&sites),
        }
    }

    fn run(fx: &Fixture, table: &str, subtype: Option<&str>, data: Value, mode: WriteMode) -> Result<Map<String, Value>, ValidationErrors> {
        let v = FieldValidator::new(&fx.access, &fx.languages);
        let t = fx.access.schema().table(table).unwrap();
        v.validate(t, subtype, data.as_object().unwrap(), mode)
    }

    #[test]
    fn identifiers_and_parent_are_guarded() {
        let fx = fixture();
        let err = run(&fx, "tt_content", None, json!({"uid": 3, "pid": 4}), WriteMode::Update).unwrap_err();
        assert_eq!(err.errors(), &[FieldError::ParentNotWritable, FieldError::IdentifierNotWritable]);
        let ok = run(&fx, "tt_content", None, json!({"pid": 4, "header": "x"}), WriteMode::Create).unwrap();
        assert!(!ok.contains_key("pid"));
    }

    #[test]
    fn all_errors_are_collected_and_named() {
        let fx = fixture();
        let err = run(&fx, "tt_content", Some("text"), json!({
            "nope": 1,
            "image": [1],
            "header": "x".repeat(300),
            "CType": "TEXT",
            "subheader": "not in text type"
        }), WriteMode::Create).unwrap_err();
        assert_eq!(err.errors().len(), 5);
        let msg = err.to_string();
        assert!(msg.contains("Field 'nope' does not exist"));
        assert!(msg.contains("File fields are not supported"));
        assert!(msg.contains("maximum length of 255"));
        assert!(msg.contains("Allowed values: text, textmedia, header, bullets, shortcut"));
        assert!(msg.contains("not available for this record type"));
    }

    #[test]
    fn multi_select_and_relations_become_csv() {
        let fx = fixture();
        let out = run(&fx, "tt_content", Some("text"), json!({
            "tx_bridge_badges": ["new", "featured"],
            "categories": [2, "1"]
        }), WriteMode::Update).unwrap();
        assert_eq!(out["tx_bridge_badges"], json!("new,featured"));
        assert_eq!(out["categories"], json!("2,1"));
    }

    #[test]
    fn relation_junk_is_rejected_with_shape_message() {
        let fx = fixture();
        let err = run(&fx, "tt_content", None, json!({"categories": {"a": 1}}), WriteMode::Update).unwrap_err();
        assert!(err.to_string().contains("must be an array of UIDs"));
        let err = run(&fx, "tt_content", None, json!({"categories": [1, -2]}), WriteMode::Update).unwrap_err();
        assert!(err.to_string().contains("must contain only positive integer UIDs"));
    }

    #[test]
    fn dates_languages_and_checks_are_converted() {
        let fx = fixture();
        let out = run(&fx, "tt_content", None, json!({
            "date": "2024-01-15T10:30:00Z",
            "sys_language_uid": "de",
            "hidden": true
        }), WriteMode::Create).unwrap();
        assert_eq!(out["date"], json!(1705314600));
        assert_eq!(out["sys_language_uid"], json!(1));
        assert_eq!(out["hidden"], json!(1));
    }

    #[test]
    fn unknown_language_names_field_and_code() {
        let fx = fixture();
        let err = run(&fx, "tt_content", None, json!({"sys_language_uid": "xx"}), WriteMode::Create).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Field 'sys_language_uid'"));
        assert!(msg.contains("Unknown language code: xx"));
    }

    #[test]
    fn bad_dates_are_errors() {
        let fx = fixture();
        let err = run(&fx, "tt_content", None, json!({"date": "yesterday"}), WriteMode::Create).unwrap_err();
        assert!(err.to_string().contains("expects an ISO-8601 date"));
    }
}
