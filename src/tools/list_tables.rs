use serde::Serialize;
use serde_json::{json, Value};

use super::params::Params;
use super::{content, Tool, ToolResult};
use crate::error::AppResult;
use crate::records::Session;

pub struct ListTables;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableEntry<'a> {
    name: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    type_field: Option<&'a str>,
    translatable: bool,
    searchable: bool,
    read_only: bool,
}

impl Tool for ListTables {
    fn name(&self) -> &'static str { "ListTables" }

    fn description(&self) -> &'static str {
        "List the tables you can read and write, with their title and capabilities."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn execute(&self, session: &Session, _params: &Params) -> AppResult<ToolResult> {
        let access = session.access();
        let tables: Vec<TableEntry> = access.accessible_tables()
            .into_iter()
            .filter(|t| access.is_addressable(&t.name))
            .map(|t| TableEntry {
                name: &t.name,
                title: if t.ctrl.title.is_empty() { &t.name } else { &t.ctrl.title },
                type_field: t.type_field(),
                translatable: t.is_translatable(),
                searchable: !t.search_fields().is_empty(),
                read_only: t.ctrl.read_only,
            })
            .collect();
        content(&json!({ "tables": tables, "total": tables.len() }))
    }
}
