use serde_json::{json, Value};
use tracing::debug;

use super::params::{self, Params};
use super::{language_param, Tool, ToolResult};
use crate::error::{AppError, AppResult};
use crate::language::Site;
use crate::records::{ReadQuery, RecordReader, Session, VisibleRecord};
use crate::schema::TableSchema;
use crate::values::as_text;

const PAGES: &str = "pages";
const CONTENT: &str = "tt_content";
// guards against pid cycles in broken page trees
const MAX_ROOTLINE_DEPTH: usize = 99;

pub struct GetPage;

impl Tool for GetPage {
    fn name(&self) -> &'static str { "GetPage" }

    fn description(&self) -> &'static str {
        "Get a page by uid or URL, with its content elements and its frontend URL."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "uid": { "type": "integer", "description": "Page uid" },
                "url": { "type": "string", "description": "Frontend URL or path of the page" },
                "language": { "type": ["string", "integer"], "description": "ISO code or numeric language id" }
            }
        })
    }

    fn execute(&self, session: &Session, p: &Params) -> AppResult<ToolResult> {
        let pages = session.addressable_table(PAGES)?;
        let requested_language = language_param(session, p)?;
        let (uid, language) = match (params::opt_uid(p, "uid")?, params::opt_str(p, "url")?) {
            (Some(uid), _) => (uid, requested_language.unwrap_or(0)),
            (None, Some(url)) if !url.trim().is_empty() => {
                let route = session.backend().resolve_path(url.trim()).ok_or_else(|| {
                    AppError::not_found("page_not_found".to_string(), format!("No page found for URL '{}'", url.trim()))
                })?;
                debug!(target: "cmsbridge::tools", "url '{}' resolved to page {} language {}", url, route.page_uid, route.language);
                (route.page_uid, requested_language.unwrap_or(route.language))
            }
            _ => return Err(AppError::invalid_param("uid", "Parameter \"uid\" or \"url\" is required")),
        };

        let page = session.record(pages, uid)
            .ok_or_else(|| AppError::not_found("page_not_found".to_string(), format!("Page {} not found", uid)))?;
        let page = match language {
            0 => page,
            lang => translation_of(session, pages, uid, lang).ok_or_else(|| {
                AppError::not_found(
                    "translation_not_found".to_string(),
                    format!("Page {} has no translation for language {}", uid, describe_language(session, lang)),
                )
            })?,
        };

        let reader = RecordReader::new(session);
        let record = reader.project(pages, &page, &ReadQuery::new(PAGES));
        let content = content_elements(session, uid, language);
        let url = page_url(session, uid, language, &page);

        Ok(ToolResult::ok(json!({
            "page": record,
            "language": describe_language(session, language),
            "url": url,
            "contentElements": content,
        })))
    }
}

fn describe_language(session: &Session, language: i64) -> Value {
    match session.languages().iso_code_from_uid(language) {
        Some(code) => json!(code),
        None => json!(language),
    }
}

fn translation_of(session: &Session, t: &TableSchema, uid: u32, language: i64) -> Option<VisibleRecord> {
    let (lf, tf) = (t.language_field()?, t.translation_parent_field()?);
    session.records(t)
        .into_iter()
        .find(|r| r.int(tf) == uid as i64 && r.int(lf) == language)
}

/// Content elements on page `pid` in `language`, in backend order.
fn content_elements(session: &Session, pid: u32, language: i64) -> Vec<Value> {
    let Some(t) = session.access().table(CONTENT) else { return Vec::new(); };
    let lf = t.language_field();
    let mut elements: Vec<VisibleRecord> = session.records(t)
        .into_iter()
        .filter(|r| r.row.pid() == pid)
        .filter(|r| lf.map(|f| r.int(f) == language).unwrap_or(true))
        .collect();
    let sf = t.sort_field();
    elements.sort_by_key(|r| (sf.map(|f| r.int(f)).unwrap_or(0), r.uid));
    let type_field = t.type_field().unwrap_or("CType");
    elements.iter()
        .map(|r| json!({
            "uid": r.uid,
            "CType": r.row.get(type_field).map(as_text).unwrap_or_default(),
            "header": r.row.get("header").map(as_text).unwrap_or_default(),
            "colPos": r.int("colPos"),
        }))
        .collect()
}

/// Site whose root page is on the rootline of `uid`.
fn site_for<'s>(session: &Session, sites: &'s [Site], uid: u32) -> Option<&'s Site> {
    let pages = session.schema().table(PAGES)?;
    let mut current = uid;
    for _ in 0..MAX_ROOTLINE_DEPTH {
        if let Some(site) = sites.iter().find(|s| s.root_page_id == current) {
            return Some(site);
        }
        let parent = session.record(pages, current)?.row.pid();
        if parent == 0 || parent == current { return None; }
        current = parent;
    }
    None
}

/// Site base, then language base, then slug.
fn page_url(session: &Session, uid: u32, language: i64, page: &VisibleRecord) -> Option<String> {
    let sites = session.backend().sites();
    let site = site_for(session, &sites, uid)?;
    let lang = site.language(language)?;
    let slug = page.row.get("slug").map(as_text).unwrap_or_default();
    Some(join_url(&[&site.base, &lang.base, &slug]))
}

fn join_url(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() || part == "/" {
            if !out.ends_with('/') { out.push('/'); }
            continue;
        }
        // an absolute language base replaces the site base
        if part.starts_with("http://") || part.starts_with("https://") {
            out = part.to_string();
            continue;
        }
        if out.ends_with('/') {
            out.push_str(part.trim_start_matches('/'));
        } else {
            if !part.starts_with('/') { out.push('/'); }
            out.push_str(part);
        }
    }
    out
}
