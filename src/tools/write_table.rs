use serde_json::{json, Value};

use super::params::{self, Params};
use super::{Tool, ToolResult};
use crate::error::{AppError, AppResult};
use crate::records::{BatchOutcome, RecordWriter, Session, WriteAction};

pub struct WriteTable;

/// Target of an update or delete: one uid or a batch.
enum Targets {
    One(u32),
    Many(Vec<u32>),
}

fn targets(p: &Params, action: &str) -> AppResult<Targets> {
    if let Some(uids) = params::opt_uid_list(p, "uids")? {
        return Ok(Targets::Many(uids));
    }
    match params::opt_uid(p, "uid")? {
        Some(uid) => Ok(Targets::One(uid)),
        None => Err(AppError::invalid_param("uid", format!("Parameter \"uid\" or \"uids\" is required for action '{}'", action))),
    }
}

fn batch_result(action: &str, table: &str, outcome: BatchOutcome) -> ToolResult {
    if outcome.is_complete() {
        return ToolResult::ok(json!({ "action": action, "table": table, "uids": outcome.succeeded }));
    }
    let err = AppError::exec(
        "batch_partial_failure".to_string(),
        format!("{} of {} records failed", outcome.failed.len(), outcome.failed.len() + outcome.succeeded.len()),
    );
    let mut payload = err.tool_payload();
    payload["succeeded"] = json!(outcome.succeeded);
    payload["failed"] = json!(outcome.failed);
    ToolResult::error(payload)
}

impl Tool for WriteTable {
    fn name(&self) -> &'static str { "WriteTable" }

    fn description(&self) -> &'static str {
        "Create, update, delete or translate records. Changes land in your draft workspace, never in live."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["create", "update", "delete", "translate"] },
                "table": { "type": "string" },
                "pid": { "type": "integer", "description": "Parent page uid (create)" },
                "uid": { "type": "integer", "description": "Record uid (update, delete, translate)" },
                "uids": { "type": "array", "items": { "type": "integer" }, "description": "Batch of record uids (update, delete)" },
                "data": { "type": "object", "description": "Field values; for translate, the language field names the target language" },
                "position": { "type": "string", "description": "top, bottom, before:<uid> or after:<uid> (create)" }
            },
            "required": ["action", "table"]
        })
    }

    fn execute(&self, session: &Session, p: &Params) -> AppResult<ToolResult> {
        let action_raw = params::req_str(p, "action")?;
        let action: WriteAction = action_raw.parse()?;
        let table = params::req_str(p, "table")?;
        let writer = RecordWriter::new(session);
        let name = action_raw.trim().to_ascii_lowercase();

        match action {
            WriteAction::Create => {
                let pid = params::opt_u32(p, "pid")?
                    .ok_or_else(|| AppError::invalid_param("pid", "Parameter \"pid\" is required for action 'create'"))?;
                let data = params::req_object(p, "data")?;
                let uid = writer.create(table, pid, data, params::opt_str(p, "position")?)?;
                Ok(ToolResult::ok(json!({ "action": name, "table": table, "uid": uid })))
            }
            WriteAction::Update => {
                let data = params::req_object(p, "data")?;
                match targets(p, &name)? {
                    Targets::One(uid) => {
                        let uid = writer.update(table, uid, data)?;
                        Ok(ToolResult::ok(json!({ "action": name, "table": table, "uid": uid })))
                    }
                    Targets::Many(uids) => Ok(batch_result(&name, table, writer.update_many(table, &uids, data)?)),
                }
            }
            WriteAction::Delete => match targets(p, &name)? {
                Targets::One(uid) => {
                    let uid = writer.delete(table, uid)?;
                    Ok(ToolResult::ok(json!({ "action": name, "table": table, "uid": uid })))
                }
                Targets::Many(uids) => Ok(batch_result(&name, table, writer.delete_many(table, &uids)?)),
            },
            WriteAction::Translate => {
                let uid = params::req_uid(p, "uid")?;
                let data = params::req_object(p, "data")?;
                let t = writer.translate(table, uid, data)?;
                Ok(ToolResult::ok(json!({
                    "action": name,
                    "table": table,
                    "sourceUid": t.source_uid,
                    "targetLanguage": t.target_language,
                    "translationUid": t.translation_uid,
                })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::FailedRecord;

    #[test]
    fn partial_batches_are_reported_as_errors_with_both_lists() {
        let outcome = BatchOutcome {
            succeeded: vec![1],
            failed: vec![FailedRecord { uid: 9, error: "Record 9 not found".into() }],
        };
        let r = batch_result("update", "tt_content", outcome);
        assert!(r.is_error);
        assert_eq!(r.content["error"]["code"], "batch_partial_failure");
        assert_eq!(r.content["succeeded"], json!([1]));
        assert_eq!(r.content["failed"][0]["uid"], 9);
    }

    #[test]
    fn complete_batches_list_the_uids() {
        let r = batch_result("delete", "pages", BatchOutcome { succeeded: vec![3, 4], failed: vec![] });
        assert!(!r.is_error);
        assert_eq!(r.content["uids"], json!([3, 4]));
    }
}
