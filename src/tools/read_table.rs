use serde_json::{json, Value};

use super::params::{self, Params};
use super::{content, language_param, Tool, ToolResult};
use crate::error::AppResult;
use crate::records::retrieval::DEFAULT_LIMIT;
use crate::records::{ReadQuery, RecordReader, Session};

pub struct ReadTable;

impl Tool for ReadTable {
    fn name(&self) -> &'static str { "ReadTable" }

    fn description(&self) -> &'static str {
        "Read records from a table as seen from your workspace. Filter by uid, pid, language or a where expression."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "table": { "type": "string", "description": "Table name" },
                "uid": { "type": "integer", "description": "Record uid" },
                "pid": { "type": "integer", "description": "Parent page uid" },
                "where": { "type": "string", "description": "Filter expression, e.g. \"hidden = 0 AND title LIKE '%news%'\"" },
                "limit": { "type": "integer", "default": DEFAULT_LIMIT, "minimum": 1, "maximum": 1000 },
                "offset": { "type": "integer", "default": 0, "minimum": 0 },
                "fields": { "type": "array", "items": { "type": "string" } },
                "language": { "type": ["string", "integer"], "description": "ISO code or numeric language id" },
                "includeTranslationSource": { "type": "boolean", "default": false },
                "includeRelations": { "type": "boolean", "default": false }
            },
            "required": ["table"]
        })
    }

    fn execute(&self, session: &Session, p: &Params) -> AppResult<ToolResult> {
        let mut q = ReadQuery::new(params::req_str(p, "table")?);
        q.uid = params::opt_uid(p, "uid")?;
        q.pid = params::opt_u32(p, "pid")?;
        q.filter = params::opt_str(p, "where")?.map(str::to_string);
        q.limit = params::opt_usize(p, "limit")?.unwrap_or(DEFAULT_LIMIT);
        q.offset = params::opt_usize(p, "offset")?.unwrap_or(0);
        q.fields = params::opt_str_list(p, "fields")?.filter(|f| !f.is_empty());
        q.language = language_param(session, p)?;
        q.include_translation_source = params::opt_bool(p, "includeTranslationSource")?;
        q.include_relations = params::opt_bool(p, "includeRelations")?;
        content(&RecordReader::new(session).read(&q)?)
    }
}
