use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::*;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },
}

#[derive(Deserialize)]
struct RawRegistry {
    tables: BTreeMap<String, RawTable>,
}

#[derive(Deserialize)]
struct RawTable {
    ctrl: TableCtrl,
    #[serde(default)]
    columns: BTreeMap<String, RawColumn>,
    #[serde(default)]
    types: BTreeMap<String, RawShowitem>,
    #[serde(default)]
    palettes: BTreeMap<String, RawShowitem>,
}

#[derive(Deserialize, Default)]
struct RawShowitem {
    #[serde(default)]
    showitem: String,
}

#[derive(Deserialize)]
struct RawColumn {
    #[serde(default)]
    label: String,
    #[serde(default)]
    l10n_mode: Option<String>,
    config: RawFieldConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawItem {
    Keyed { #[serde(default)] label: String, value: Value },
    // legacy [label, value, icon] form
    Positional(Vec<Value>),
}

impl RawItem {
    fn value_string(&self) -> Option<String> {
        let v = match self {
            RawItem::Keyed { value, .. } => value,
            RawItem::Positional(parts) => parts.get(1)?,
        };
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawFieldConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "renderType", default)]
    render_type: Option<String>,
    #[serde(default)]
    max: Option<usize>,
    #[serde(default)]
    eval: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    items: Vec<RawItem>,
    #[serde(default)]
    maxitems: Option<u32>,
    #[serde(default)]
    multiple: bool,
    #[serde(default)]
    foreign_table: Option<String>,
    #[serde(default)]
    foreign_field: Option<String>,
    #[serde(default)]
    foreign_table_field: Option<String>,
    #[serde(default)]
    foreign_sortby: Option<String>,
    #[serde(default)]
    allowed: Option<String>,
    #[serde(rename = "MM", default)]
    mm: Option<String>,
    #[serde(rename = "MM_opposite_field", default)]
    mm_opposite_field: Option<String>,
    #[serde(rename = "MM_match_fields", default)]
    mm_match_fields: BTreeMap<String, String>,
}

const CATEGORY_MM: &str = "sys_category_record_mm";
const FILE_REFERENCE_TABLE: &str = "sys_file_reference";

fn csv_list(s: &str) -> Vec<String> {
    s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
}

fn mm_shape(table: &str, field: &str, cfg: &RawFieldConfig, mm_table: &str) -> RelationShape {
    let mut match_fields = cfg.mm_match_fields.clone();
    let shape = if cfg.mm_opposite_field.is_some() {
        // Opposite side of a shared junction: owner identified by tablenames/fieldname.
        match_fields.entry("tablenames".into()).or_insert_with(|| table.to_string());
        match_fields.entry("fieldname".into()).or_insert_with(|| field.to_string());
        MmShape::Opposite
    } else {
        MmShape::Standard
    };
    RelationShape::ManyToMany(MmRelation { mm_table: mm_table.to_string(), shape, match_fields })
}

fn field_kind(table: &str, field: &str, cfg: &RawFieldConfig) -> FieldKind {
    let eval = cfg.eval.as_deref().unwrap_or("").to_ascii_lowercase();
    let items = || cfg.items.iter().filter_map(|i| i.value_string()).collect::<Vec<_>>();
    match cfg.kind.as_str() {
        "input" if eval.split(',').any(|e| matches!(e.trim(), "int" | "num" | "double2")) => FieldKind::Number,
        "input" if eval.split(',').any(|e| matches!(e.trim(), "date" | "datetime" | "time")) => FieldKind::Date,
        "input" | "text" | "email" | "link" | "slug" | "color" | "password" | "json" | "flex" => FieldKind::Text { max: cfg.max },
        "number" => FieldKind::Number,
        "datetime" => FieldKind::Date,
        "check" => FieldKind::Check,
        "radio" => FieldKind::Select { items: items(), multiple: false },
        "language" => FieldKind::Language,
        "file" => FieldKind::File,
        "select" => match &cfg.foreign_table {
            Some(ft) => FieldKind::Relation(Relation {
                foreign_tables: vec![ft.clone()],
                shape: match &cfg.mm { Some(mm) => mm_shape(table, field, cfg, mm), None => RelationShape::Direct },
                maxitems: cfg.maxitems,
            }),
            None => {
                let rt = cfg.render_type.as_deref().unwrap_or("").to_ascii_lowercase();
                let multiple = cfg.multiple
                    || rt.contains("multiple")
                    || rt.contains("checkbox")
                    || cfg.maxitems.map(|m| m > 1).unwrap_or(false);
                FieldKind::Select { items: items(), multiple }
            }
        },
        "category" => {
            let mm = cfg.mm.clone().unwrap_or_else(|| CATEGORY_MM.to_string());
            let mut match_fields = cfg.mm_match_fields.clone();
            match_fields.entry("tablenames".into()).or_insert_with(|| table.to_string());
            match_fields.entry("fieldname".into()).or_insert_with(|| field.to_string());
            FieldKind::Relation(Relation {
                foreign_tables: vec![cfg.foreign_table.clone().unwrap_or_else(|| "sys_category".to_string())],
                shape: RelationShape::ManyToMany(MmRelation { mm_table: mm, shape: MmShape::Opposite, match_fields }),
                maxitems: cfg.maxitems,
            })
        }
        "group" => FieldKind::Relation(Relation {
            foreign_tables: cfg.allowed.as_deref().map(csv_list).unwrap_or_default(),
            shape: match &cfg.mm { Some(mm) => mm_shape(table, field, cfg, mm), None => RelationShape::Direct },
            maxitems: cfg.maxitems,
        }),
        "inline" => match cfg.foreign_table.as_deref() {
            Some(FILE_REFERENCE_TABLE) | None => FieldKind::File,
            Some(ft) => {
                let shape = match (&cfg.mm, &cfg.foreign_field) {
                    (Some(mm), _) => mm_shape(table, field, cfg, mm),
                    (None, Some(ff)) => RelationShape::Inline(InlineRelation {
                        foreign_field: ff.clone(),
                        foreign_table_field: cfg.foreign_table_field.clone(),
                        foreign_sortby: cfg.foreign_sortby.clone(),
                    }),
                    (None, None) => RelationShape::Direct,
                };
                FieldKind::Relation(Relation { foreign_tables: vec![ft.to_string()], shape, maxitems: cfg.maxitems })
            }
        },
        _ => FieldKind::Passthrough,
    }
}

/// Expand a `showitem` string into field names, resolving palettes and dropping dividers.
fn expand_showitem(showitem: &str, palettes: &BTreeMap<String, RawShowitem>, columns: &BTreeMap<String, RawColumn>, out: &mut Vec<String>) {
    for raw in showitem.split(',') {
        let entry = raw.trim();
        if entry.is_empty() { continue; }
        let mut parts = entry.split(';');
        let name = parts.next().unwrap_or("").trim();
        match name {
            "--div--" | "--linebreak--" => {}
            "--palette--" => {
                // --palette--;<label>;<palette name>
                let pname = parts.nth(1).unwrap_or("").trim();
                if let Some(p) = palettes.get(pname) { expand_showitem(&p.showitem, palettes, columns, out); }
            }
            n if columns.contains_key(n) => {
                if !out.iter().any(|e| e == n) { out.push(n.to_string()); }
            }
            _ => {}
        }
    }
}

impl SchemaRegistry {
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        let raw: RawRegistry = serde_json::from_str(text)?;
        let mut tables = BTreeMap::new();
        for (name, rt) in raw.tables.into_iter() {
            if let Some(tf) = rt.ctrl.type_field.as_deref() {
                if !rt.columns.contains_key(tf) {
                    return Err(SchemaError::InvalidTable { table: name, reason: format!("type field '{}' has no column definition", tf) });
                }
            }
            let mut fields = BTreeMap::new();
            for (fname, col) in rt.columns.iter() {
                let mut kind = field_kind(&name, fname, &col.config);
                if rt.ctrl.language_field.as_deref() == Some(fname.as_str()) { kind = FieldKind::Language; }
                fields.insert(fname.clone(), FieldConfig {
                    name: fname.clone(),
                    label: if col.label.is_empty() { fname.clone() } else { col.label.clone() },
                    kind,
                    required: col.config.required,
                    l10n_mode: col.l10n_mode.clone(),
                });
            }
            let mut types = BTreeMap::new();
            for (tkey, t) in rt.types.iter() {
                let mut list = Vec::new();
                expand_showitem(&t.showitem, &rt.palettes, &rt.columns, &mut list);
                types.insert(tkey.clone(), list);
            }
            debug!(target: "cmsbridge::schema", "loaded table='{}' fields={} types={}", name, fields.len(), types.len());
            tables.insert(name.clone(), TableSchema { name, ctrl: rt.ctrl, fields, types });
        }
        Ok(SchemaRegistry { tables })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
        SchemaRegistry::from_json_str(&text)
            .with_context(|| format!("While parsing schema file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_field_without_column_is_rejected() {
        let text = r#"{"tables":{"t":{"ctrl":{"title":"T","type":"kind"},"columns":{}}}}"#;
        let err = SchemaRegistry::from_json_str(text).unwrap_err();
        assert!(err.to_string().contains("type field 'kind'"));
    }

    #[test]
    fn legacy_positional_items_are_read() {
        let text = r#"{"tables":{"t":{"ctrl":{"title":"T"},"columns":{
            "layout":{"config":{"type":"select","renderType":"selectSingle","items":[["Default","0"],["Wide",1]]}}
        }}}}"#;
        let reg = SchemaRegistry::from_json_str(text).unwrap();
        match &reg.table("t").unwrap().field("layout").unwrap().kind {
            FieldKind::Select { items, multiple } => {
                assert_eq!(items, &vec!["0".to_string(), "1".to_string()]);
                assert!(!multiple);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn input_eval_selects_number_and_date_kinds() {
        let text = r#"{"tables":{"t":{"ctrl":{"title":"T"},"columns":{
            "count":{"config":{"type":"input","eval":"trim,int"}},
            "starts":{"config":{"type":"input","eval":"datetime"}},
            "title":{"config":{"type":"input","max":10}}
        }}}}"#;
        let reg = SchemaRegistry::from_json_str(text).unwrap();
        let t = reg.table("t").unwrap();
        assert_eq!(t.field("count").unwrap().kind, FieldKind::Number);
        assert_eq!(t.field("starts").unwrap().kind, FieldKind::Date);
        assert_eq!(t.field("title").unwrap().kind, FieldKind::Text { max: Some(10) });
    }

    #[test]
    fn load_reports_missing_file_path() {
        let err = SchemaRegistry::load(Path::new("/nonexistent/schema.json")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/schema.json"));
    }
}
