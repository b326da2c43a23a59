//! Multi-table substring search with owner attribution for embedded child tables.

use std::collections::HashSet;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::session::{Session, VisibleRecord};
use crate::error::{AppError, AppResult};
use crate::schema::TableSchema;
use crate::values::as_text;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 100;
const MIN_TERM_CHARS: usize = 2;
const MAX_TERM_CHARS: usize = 100;
// nesting of inline children followed when attributing a match
const MAX_OWNER_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TermLogic {
    And,
    Or,
}

impl FromStr for TermLogic {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(TermLogic::And),
            "OR" => Ok(TermLogic::Or),
            _ => Err(AppError::invalid_param("termLogic", format!("Invalid termLogic '{}'. Use AND or OR", s))),
        }
    }
}

/// Validate raw `terms`: strings only, trimmed, blanks dropped, 2 to 100 characters.
pub fn parse_terms(raw: &Value) -> AppResult<Vec<String>> {
    let items = match raw {
        Value::Array(a) => a.clone(),
        Value::String(s) => vec![Value::String(s.clone())],
        Value::Null => Vec::new(),
        _ => return Err(AppError::invalid_param("terms", "Parameter \"terms\" must be an array of strings")),
    };
    let mut terms = Vec::with_capacity(items.len());
    for item in items {
        let Value::String(s) = item else {
            return Err(AppError::invalid_param("terms", "All search terms must be strings"));
        };
        let term = s.trim();
        if term.is_empty() { continue; }
        let len = term.chars().count();
        if !(MIN_TERM_CHARS..=MAX_TERM_CHARS).contains(&len) {
            return Err(AppError::invalid_param(
                "terms",
                format!("Search term '{}' must be between {} and {} characters long", term, MIN_TERM_CHARS, MAX_TERM_CHARS),
            ));
        }
        terms.push(term.to_string());
    }
    if terms.is_empty() {
        return Err(AppError::invalid_param("terms", "At least one non-empty search term is required"));
    }
    Ok(terms)
}

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub terms: Vec<String>,
    pub logic: TermLogic,
    pub table: Option<String>,
    pub page_id: Option<u32>,
    pub limit: usize,
    pub language: Option<i64>,
}

impl SearchQuery {
    pub fn new(terms: Vec<String>) -> Self {
        SearchQuery { terms, logic: TermLogic::And, table: None, page_id: None, limit: DEFAULT_LIMIT, language: None }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchedIn {
    pub table: String,
    pub uid: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub table: String,
    pub uid: u32,
    pub pid: u32,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_in: Option<MatchedIn>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub terms: Vec<String>,
    pub term_logic: TermLogic,
    pub total: usize,
    pub results: Vec<SearchHit>,
}

pub struct RecordSearch<'a> {
    session: &'a Session,
}

impl<'a> RecordSearch<'a> {
    pub fn new(session: &'a Session) -> Self { Self { session } }

    pub fn search(&self, q: &SearchQuery) -> AppResult<SearchResult> {
        if q.limit == 0 || q.limit > MAX_LIMIT {
            return Err(AppError::invalid_param("limit", format!("Parameter \"limit\" must be between 1 and {}", MAX_LIMIT)));
        }
        let needles: Vec<String> = q.terms.iter().map(|t| t.to_lowercase()).collect();
        let tables = self.tables_to_scan(q)?;

        let mut seen: HashSet<(String, u32)> = HashSet::new();
        let mut results: Vec<SearchHit> = Vec::new();
        let mut per_table: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for t in tables {
            let fields = t.search_fields();
            if fields.is_empty() { continue; }
            let addressable = self.session.access().is_addressable(&t.name);
            for rec in self.session.records(t) {
                if !self.matches(&rec, &fields, &needles, q.logic) { continue; }
                let (owner_table, owner, matched_in) = if addressable {
                    (t, rec.clone(), None)
                } else {
                    match self.attribute(t, &rec, 0) {
                        Some((ot, o)) => (ot, o, Some(MatchedIn { table: t.name.clone(), uid: rec.uid })),
                        None => {
                            warn!(target: "cmsbridge::search", "match {}:{} has no addressable owner; skipped", t.name, rec.uid);
                            continue;
                        }
                    }
                };
                if !self.in_scope(owner_table, &owner, q) { continue; }
                let count = per_table.entry(owner_table.name.clone()).or_insert(0);
                if *count >= q.limit { continue; }
                if !seen.insert((owner_table.name.clone(), owner.uid)) { continue; }
                *count += 1;
                results.push(hit(owner_table, &owner, matched_in));
            }
        }
        debug!(target: "cmsbridge::search", "search terms={:?} logic={:?} hits={}", q.terms, q.logic, results.len());
        Ok(SearchResult { terms: q.terms.clone(), term_logic: q.logic, total: results.len(), results })
    }

    /// The requested table plus its embedded child tables, or every accessible table.
    fn tables_to_scan(&self, q: &SearchQuery) -> AppResult<Vec<&'a TableSchema>> {
        let access = self.session.access();
        let Some(name) = q.table.as_deref() else {
            return Ok(access.accessible_tables());
        };
        let root = self.session.addressable_table(name)?;
        let mut out = vec![root];
        let mut i = 0;
        while i < out.len() {
            let current = out[i];
            for f in current.fields.values() {
                let Some(rel) = f.relation() else { continue; };
                if !matches!(rel.shape, crate::schema::RelationShape::Inline(_)) { continue; }
                for ft in rel.foreign_tables.iter() {
                    if access.is_addressable(ft) { continue; }
                    if let Some(child) = access.table(ft) {
                        if !out.iter().any(|t| t.name == child.name) { out.push(child); }
                    }
                }
            }
            i += 1;
        }
        Ok(out)
    }

    fn matches(&self, rec: &VisibleRecord, fields: &[&str], needles: &[String], logic: TermLogic) -> bool {
        let haystacks: Vec<String> = fields.iter()
            .filter_map(|f| rec.row.get(f))
            .map(|v| as_text(v).to_lowercase())
            .collect();
        let hit = |n: &String| haystacks.iter().any(|h| h.contains(n.as_str()));
        match logic {
            TermLogic::And => needles.iter().all(hit),
            TermLogic::Or => needles.iter().any(hit),
        }
    }

    /// Nearest addressable owner of a record in an embedded child table.
    fn attribute(&self, child: &TableSchema, rec: &VisibleRecord, depth: usize) -> Option<(&'a TableSchema, VisibleRecord)> {
        if depth >= MAX_OWNER_DEPTH { return None; }
        for owner in self.session.schema().inline_owners(&child.name) {
            if let Some(tf) = &owner.relation.foreign_table_field {
                if rec.row.get(tf).map(as_text).as_deref() != Some(owner.table) { continue; }
            }
            let owner_uid = rec.int(&owner.relation.foreign_field);
            if owner_uid <= 0 { continue; }
            let Some(ot) = self.session.access().table(owner.table) else { continue; };
            let Some(parent) = self.session.record(ot, owner_uid as u32) else { continue; };
            if self.session.access().is_addressable(&ot.name) {
                return Some((ot, parent));
            }
            if let Some(found) = self.attribute(ot, &parent, depth + 1) {
                return Some(found);
            }
        }
        None
    }

    fn in_scope(&self, t: &TableSchema, rec: &VisibleRecord, q: &SearchQuery) -> bool {
        if let Some(pid) = q.page_id {
            if rec.row.pid() != pid { return false; }
        }
        match (q.language, t.language_field()) {
            (Some(lang), Some(lf)) => rec.int(lf) == lang,
            _ => true,
        }
    }
}

fn hit(t: &TableSchema, rec: &VisibleRecord, matched_in: Option<MatchedIn>) -> SearchHit {
    SearchHit {
        table: t.name.clone(),
        uid: rec.uid,
        pid: rec.row.pid(),
        title: t.label_field().and_then(|l| rec.row.get(l)).map(as_text).unwrap_or_default(),
        language: t.language_field().map(|lf| rec.int(lf)),
        matched_in,
    }
}
