use serde_json::{json, Value};

use super::params::{self, Params};
use super::{content, language_param, Tool, ToolResult};
use crate::error::AppResult;
use crate::records::search::{parse_terms, DEFAULT_LIMIT};
use crate::records::{RecordSearch, SearchQuery, Session, TermLogic};

pub struct Search;

impl Tool for Search {
    fn name(&self) -> &'static str { "Search" }

    fn description(&self) -> &'static str {
        "Search records by one or more terms across the searchable fields of accessible tables."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "terms": { "type": "array", "items": { "type": "string", "minLength": 2, "maxLength": 100 } },
                "termLogic": { "type": "string", "enum": ["AND", "OR"], "default": "AND" },
                "table": { "type": "string", "description": "Limit the search to one table" },
                "pageId": { "type": "integer", "description": "Limit the search to records on this page" },
                "limit": { "type": "integer", "default": DEFAULT_LIMIT, "minimum": 1, "maximum": 100 },
                "language": { "type": ["string", "integer"], "description": "ISO code or numeric language id" }
            },
            "required": ["terms"]
        })
    }

    fn execute(&self, session: &Session, p: &Params) -> AppResult<ToolResult> {
        let mut q = SearchQuery::new(parse_terms(p.get("terms").unwrap_or(&Value::Null))?);
        q.logic = match params::opt_str(p, "termLogic")? {
            Some(s) => s.parse::<TermLogic>()?,
            None => TermLogic::And,
        };
        q.table = params::opt_str(p, "table")?.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        q.page_id = params::opt_u32(p, "pageId")?;
        q.limit = params::opt_usize(p, "limit")?.unwrap_or(DEFAULT_LIMIT);
        q.language = language_param(session, p)?;
        content(&RecordSearch::new(session).search(&q)?)
    }
}
