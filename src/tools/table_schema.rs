use serde_json::{json, Map, Value};

use super::params::{self, Params};
use super::{Tool, ToolResult};
use crate::error::{AppError, AppResult};
use crate::records::Session;
use crate::schema::{FieldConfig, FieldKind};

pub struct GetTableSchema;

fn describe(f: &FieldConfig) -> Value {
    let mut out = Map::new();
    out.insert("name".into(), json!(f.name));
    out.insert("label".into(), json!(f.label));
    out.insert("type".into(), json!(f.kind_label()));
    out.insert("required".into(), json!(f.required));
    match &f.kind {
        FieldKind::Text { max: Some(max) } => { out.insert("max".into(), json!(max)); }
        FieldKind::Select { items, .. } => { out.insert("items".into(), json!(items)); }
        FieldKind::Relation(rel) => {
            let mut r = Map::new();
            r.insert("tables".into(), json!(rel.foreign_tables));
            r.insert("shape".into(), json!(rel.shape_label()));
            if let Some(max) = rel.maxitems { r.insert("maxitems".into(), json!(max)); }
            out.insert("relation".into(), Value::Object(r));
        }
        _ => {}
    }
    if f.inherits_from_source() {
        out.insert("l10nMode".into(), json!("exclude"));
    }
    Value::Object(out)
}

impl Tool for GetTableSchema {
    fn name(&self) -> &'static str { "GetTableSchema" }

    fn description(&self) -> &'static str {
        "Describe the writable fields of a table, optionally for one record type."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": { "type": "string" },
                "type": { "type": "string", "description": "Record type, e.g. a CType value" }
            },
            "required": ["table"]
        })
    }

    fn execute(&self, session: &Session, p: &Params) -> AppResult<ToolResult> {
        let t = session.table(params::req_str(p, "table")?)?;
        let requested = params::opt_str(p, "type")?.map(str::trim).filter(|s| !s.is_empty());
        let types: Vec<&str> = t.types.keys().map(|k| k.as_str()).collect();
        if let Some(ty) = requested {
            if !t.types.contains_key(ty) {
                return Err(AppError::invalid_param(
                    "type",
                    format!("Unknown type '{}' for table '{}'. Available types: {}", ty, t.name, types.join(", ")),
                ));
            }
        }
        let fields: Vec<Value> = session.access()
            .available_fields(&t.name, requested)
            .into_iter()
            .map(describe)
            .collect();
        Ok(ToolResult::ok(json!({
            "table": t.name,
            "title": t.ctrl.title,
            "typeField": t.type_field(),
            "languageField": t.language_field(),
            "types": types,
            "type": requested,
            "fields": fields,
        })))
    }
}
