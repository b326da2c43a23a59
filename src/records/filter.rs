//! Custom `where` filters for record reads.
//!
//! A filter string first passes a keyword denylist, then is parsed into a small boolean
//! expression language: comparisons (`= != <> < <= > >=`), `[NOT] LIKE`, `[NOT] IN (..)`,
//! `[NOT] BETWEEN .. AND ..`, `IS [NOT] NULL`, combined with `AND`, `OR`, `NOT` and
//! parentheses. Expressions are evaluated in memory against the overlaid values of a
//! record; nothing is ever handed to a database.

use std::collections::BTreeSet;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::values::{as_text, iso_to_epoch};

/// Longest filter string accepted, in bytes.
pub const MAX_FILTER_LEN: usize = 4096;
/// Deepest nesting of parentheses and `NOT` accepted.
pub const MAX_FILTER_DEPTH: usize = 64;

static DENYLIST: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)(;|--|#|/\*|\*/|\b(DROP|DELETE|INSERT|UPDATE|ALTER|CREATE|TRUNCATE|REPLACE|GRANT|REVOKE|UNION|EXEC|EXECUTE|SLEEP|BENCHMARK|LOAD_FILE|OUTFILE|DUMPFILE|INTO|SELECT|HANDLER|CALL)\b)",
    )
    .ok()
});

/// Reject statement terminators, comments and statement keywords outright.
pub fn guard(src: &str) -> Result<()> {
    let Some(re) = DENYLIST.as_ref() else { anyhow::bail!("Custom filters are unavailable"); };
    if let Some(m) = re.find(src) {
        anyhow::bail!("Filter contains a forbidden keyword or character: '{}'", m.as_str().trim());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Text(String),
    Number(f64),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompOp { Eq, Ne, Lt, Le, Gt, Ge }

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    Comp { left: Operand, op: CompOp, right: Operand },
    Like { expr: Operand, pattern: Operand, negated: bool },
    In { expr: Operand, list: Vec<Operand>, negated: bool },
    Between { expr: Operand, low: Operand, high: Operand, negated: bool },
    IsNull { expr: Operand, negated: bool },
    And(Box<FilterExpr>, Box<FilterExpr>),
    Or(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expr: FilterExpr,
}

impl Filter {
    pub fn parse(src: &str) -> Result<Self> {
        if src.len() > MAX_FILTER_LEN {
            anyhow::bail!("Filter is too long ({} characters, at most {} allowed)", src.len(), MAX_FILTER_LEN);
        }
        guard(src)?;
        let toks = lex(src)?;
        if toks.is_empty() { anyhow::bail!("Filter expression is empty"); }
        let mut cur = Cursor { toks, idx: 0 };
        let expr = parse_bool_expr(&mut cur, src, 1, 0)?;
        if let Some(t) = cur.peek() {
            anyhow::bail!("Syntax error at position {}: unexpected token.\n{}", t.pos, caret_snippet(src, t.pos));
        }
        Ok(Filter { expr })
    }

    pub fn expr(&self) -> &FilterExpr { &self.expr }

    /// Turn ISO-8601 literals compared with date columns into epoch seconds, the form
    /// date columns are stored in. `is_date` tells which columns hold dates.
    pub fn bind_dates<F>(&mut self, is_date: &F) -> Result<()>
    where
        F: Fn(&str) -> bool,
    {
        bind_dates(&mut self.expr, is_date)
    }

    /// Every column the filter refers to.
    pub fn columns(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        collect_columns(&self.expr, &mut out);
        out
    }

    /// Evaluate against one record; `lookup` yields the value of a column.
    pub fn matches<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Option<Value>,
    {
        eval(&self.expr, lookup)
    }
}

#[derive(Clone, Debug, PartialEq)]
enum TKind {
    Ident(String), Str(String), Num(String), LParen, RParen, Comma,
    Eq, Ne, Lt, Gt, Le, Ge,
    And, Or, Not, Is, Null,
    Like, Between, In,
    True, False,
}

#[derive(Clone, Debug)]
struct Tok { kind: TKind, pos: usize }

fn is_ident_start(c: char) -> bool { c.is_ascii_alphabetic() || c == '_' }
fn is_ident_part(c: char) -> bool { c.is_ascii_alphanumeric() || c == '_' || c == '.' }

fn caret_snippet(src: &str, pos: usize) -> String {
    let pos = pos.min(src.len());
    let prefix = src.get(..pos).unwrap_or(src);
    let line_start = prefix.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = src.get(pos..).and_then(|r| r.find('\n')).map(|i| pos + i).unwrap_or(src.len());
    let line = src.get(line_start..line_end).unwrap_or("");
    let col = prefix.get(line_start..).map(|p| p.chars().count()).unwrap_or(0);
    format!("{}\n{}^", line, " ".repeat(col))
}

fn lex(input: &str) -> Result<Vec<Tok>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let mut i = 0usize;
    let mut toks: Vec<Tok> = Vec::new();
    while i < chars.len() {
        let (pos, c) = chars[i];
        if c.is_whitespace() { i += 1; continue; }
        // quoted strings, doubled quote escapes itself
        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            let mut closed = false;
            while let Some(ch) = at(i) {
                if ch == quote {
                    if at(i + 1) == Some(quote) { s.push(quote); i += 2; continue; }
                    i += 1;
                    closed = true;
                    break;
                }
                s.push(ch);
                i += 1;
            }
            if !closed {
                anyhow::bail!("Syntax error at position {}: unterminated string.\n{}", pos, caret_snippet(input, pos));
            }
            toks.push(Tok { kind: TKind::Str(s), pos });
            continue;
        }
        let negative = c == '-' && at(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false);
        if c.is_ascii_digit() || negative {
            let start = i;
            i += 1;
            while let Some(ch) = at(i) { if ch.is_ascii_digit() || ch == '.' { i += 1; } else { break; } }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            toks.push(Tok { kind: TKind::Num(text), pos });
            continue;
        }
        if is_ident_start(c) {
            let start = i;
            i += 1;
            while let Some(ch) = at(i) { if is_ident_part(ch) { i += 1; } else { break; } }
            let raw: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let kind = match raw.to_uppercase().as_str() {
                "AND" => TKind::And,
                "OR" => TKind::Or,
                "NOT" => TKind::Not,
                "IS" => TKind::Is,
                "NULL" => TKind::Null,
                "LIKE" => TKind::Like,
                "BETWEEN" => TKind::Between,
                "IN" => TKind::In,
                "TRUE" => TKind::True,
                "FALSE" => TKind::False,
                _ => TKind::Ident(raw),
            };
            toks.push(Tok { kind, pos });
            continue;
        }
        let next = at(i + 1);
        let (kind, width) = match c {
            '(' => (TKind::LParen, 1),
            ')' => (TKind::RParen, 1),
            ',' => (TKind::Comma, 1),
            '=' => (TKind::Eq, 1),
            '<' if next == Some('=') => (TKind::Le, 2),
            '<' if next == Some('>') => (TKind::Ne, 2),
            '<' => (TKind::Lt, 1),
            '>' if next == Some('=') => (TKind::Ge, 2),
            '>' => (TKind::Gt, 1),
            '!' if next == Some('=') => (TKind::Ne, 2),
            _ => anyhow::bail!("Syntax error at position {}: unexpected character '{}'.\n{}", pos, c, caret_snippet(input, pos)),
        };
        toks.push(Tok { kind, pos });
        i += width;
    }
    Ok(toks)
}

struct Cursor { toks: Vec<Tok>, idx: usize }

impl Cursor {
    fn peek(&self) -> Option<&Tok> { self.toks.get(self.idx) }
    fn next(&mut self) -> Option<Tok> { let t = self.toks.get(self.idx).cloned(); if t.is_some() { self.idx += 1; } t }
    fn peek_kind(&self) -> Option<TKind> { self.peek().map(|t| t.kind.clone()) }
    fn peek_pos(&self, src: &str) -> usize { self.peek().map(|t| t.pos).unwrap_or(src.len()) }
    fn eat(&mut self, kind: TKind) -> bool {
        if self.peek_kind() == Some(kind) { self.idx += 1; true } else { false }
    }
}

fn parse_operand(cur: &mut Cursor, src: &str) -> Result<Operand> {
    let Some(t) = cur.next() else {
        anyhow::bail!("Syntax error: unexpected end of input while parsing expression.");
    };
    match t.kind {
        TKind::Ident(name) => Ok(Operand::Column(name)),
        TKind::Str(s) => Ok(Operand::Text(s)),
        TKind::Num(n) => match n.parse::<f64>() {
            Ok(v) => Ok(Operand::Number(v)),
            Err(_) => anyhow::bail!("Invalid number '{}' at position {}.\n{}", n, t.pos, caret_snippet(src, t.pos)),
        },
        TKind::Null => Ok(Operand::Null),
        TKind::True => Ok(Operand::Number(1.0)),
        TKind::False => Ok(Operand::Number(0.0)),
        _ => anyhow::bail!("Syntax error at position {}: expected column or value.\n{}", t.pos, caret_snippet(src, t.pos)),
    }
}

fn parse_comparison(cur: &mut Cursor, src: &str) -> Result<FilterExpr> {
    let left = parse_operand(cur, src)?;
    if matches!(cur.peek_kind(), Some(TKind::Is)) {
        let is_pos = cur.peek_pos(src);
        cur.next();
        let negated = cur.eat(TKind::Not);
        if !cur.eat(TKind::Null) {
            anyhow::bail!("Syntax error at position {}: expected NULL after IS{}.\n{}", is_pos, if negated { " NOT" } else { "" }, caret_snippet(src, is_pos));
        }
        return Ok(FilterExpr::IsNull { expr: left, negated });
    }
    let negated = cur.eat(TKind::Not);
    match cur.peek_kind() {
        Some(TKind::Like) => {
            cur.next();
            let pattern = parse_operand(cur, src)?;
            Ok(FilterExpr::Like { expr: left, pattern, negated })
        }
        Some(TKind::Between) => {
            cur.next();
            let low = parse_operand(cur, src)?;
            if !cur.eat(TKind::And) {
                let p = cur.peek_pos(src);
                anyhow::bail!("Syntax error at position {}: expected AND in BETWEEN.\n{}", p, caret_snippet(src, p));
            }
            let high = parse_operand(cur, src)?;
            Ok(FilterExpr::Between { expr: left, low, high, negated })
        }
        Some(TKind::In) => {
            cur.next();
            if !cur.eat(TKind::LParen) {
                let p = cur.peek_pos(src);
                anyhow::bail!("Syntax error at position {}: expected '(' after IN.\n{}", p, caret_snippet(src, p));
            }
            let mut list = Vec::new();
            loop {
                if cur.eat(TKind::RParen) { break; }
                list.push(parse_operand(cur, src)?);
                if cur.eat(TKind::Comma) { continue; }
                if cur.eat(TKind::RParen) { break; }
                let p = cur.peek_pos(src);
                anyhow::bail!("Syntax error at position {}: expected ',' or ')'.\n{}", p, caret_snippet(src, p));
            }
            if list.is_empty() { anyhow::bail!("IN clause requires at least one value"); }
            Ok(FilterExpr::In { expr: left, list, negated })
        }
        _ if negated => {
            let p = cur.peek_pos(src);
            anyhow::bail!("Syntax error at position {}: expected LIKE, IN or BETWEEN after NOT.\n{}", p, caret_snippet(src, p));
        }
        Some(k) => {
            let op = match k {
                TKind::Eq => Some(CompOp::Eq),
                TKind::Ne => Some(CompOp::Ne),
                TKind::Lt => Some(CompOp::Lt),
                TKind::Le => Some(CompOp::Le),
                TKind::Gt => Some(CompOp::Gt),
                TKind::Ge => Some(CompOp::Ge),
                _ => None,
            };
            match op {
                Some(op) => {
                    cur.next();
                    let right = parse_operand(cur, src)?;
                    Ok(FilterExpr::Comp { left, op, right })
                }
                // bare column: truthiness
                None => Ok(FilterExpr::Comp { left, op: CompOp::Eq, right: Operand::Number(1.0) }),
            }
        }
        None => Ok(FilterExpr::Comp { left, op: CompOp::Eq, right: Operand::Number(1.0) }),
    }
}

// precedence: OR=1, AND=2, comparisons=3
fn precedence(kind: &TKind) -> i32 { match kind { TKind::Or => 1, TKind::And => 2, _ => 0 } }

fn parse_bool_expr(cur: &mut Cursor, src: &str, min_prec: i32, depth: usize) -> Result<FilterExpr> {
    if depth > MAX_FILTER_DEPTH {
        let p = cur.peek_pos(src);
        anyhow::bail!("Filter is nested too deeply at position {} (at most {} levels)", p, MAX_FILTER_DEPTH);
    }
    let mut left = match cur.peek_kind() {
        Some(TKind::Not) => {
            cur.next();
            FilterExpr::Not(Box::new(parse_bool_expr(cur, src, 3, depth + 1)?))
        }
        Some(TKind::LParen) => {
            cur.next();
            let e = parse_bool_expr(cur, src, 1, depth + 1)?;
            if !cur.eat(TKind::RParen) {
                let p = cur.peek_pos(src);
                anyhow::bail!("Syntax error at position {}: expected ')'.\n{}", p, caret_snippet(src, p));
            }
            e
        }
        _ => parse_comparison(cur, src)?,
    };
    loop {
        let Some(kind) = cur.peek_kind() else { break; };
        let prec = precedence(&kind);
        if prec == 0 || prec < min_prec { break; }
        cur.next();
        let right = parse_bool_expr(cur, src, prec + 1, depth + 1)?;
        left = match kind {
            TKind::And => FilterExpr::And(Box::new(left), Box::new(right)),
            _ => FilterExpr::Or(Box::new(left), Box::new(right)),
        };
    }
    if min_prec <= 1 {
        if let Some(t) = cur.peek() {
            if !matches!(t.kind, TKind::RParen) {
                anyhow::bail!("Syntax error at position {}: expected AND, OR or end of filter.\n{}", t.pos, caret_snippet(src, t.pos));
            }
        }
    }
    Ok(left)
}

fn operand_column<'a>(o: &'a Operand, out: &mut BTreeSet<&'a str>) {
    if let Operand::Column(c) = o { out.insert(c.as_str()); }
}

fn collect_columns<'a>(e: &'a FilterExpr, out: &mut BTreeSet<&'a str>) {
    match e {
        FilterExpr::Comp { left, right, .. } => { operand_column(left, out); operand_column(right, out); }
        FilterExpr::Like { expr, pattern, .. } => { operand_column(expr, out); operand_column(pattern, out); }
        FilterExpr::In { expr, list, .. } => {
            operand_column(expr, out);
            for o in list { operand_column(o, out); }
        }
        FilterExpr::Between { expr, low, high, .. } => {
            operand_column(expr, out);
            operand_column(low, out);
            operand_column(high, out);
        }
        FilterExpr::IsNull { expr, .. } => operand_column(expr, out),
        FilterExpr::And(a, b) | FilterExpr::Or(a, b) => { collect_columns(a, out); collect_columns(b, out); }
        FilterExpr::Not(a) => collect_columns(a, out),
    }
}

fn date_literal(o: &mut Operand, column: &str) -> Result<()> {
    if let Operand::Text(s) = o {
        let ts = iso_to_epoch(s.trim()).ok_or_else(|| {
            anyhow::anyhow!("Value '{}' compared with date column '{}' is not an ISO-8601 date", s, column)
        })?;
        *o = Operand::Number(ts as f64);
    }
    Ok(())
}

fn date_column<'a, F: Fn(&str) -> bool>(o: &'a Operand, is_date: &F) -> Option<&'a str> {
    match o {
        Operand::Column(c) if is_date(c) => Some(c.as_str()),
        _ => None,
    }
}

fn bind_dates<F: Fn(&str) -> bool>(e: &mut FilterExpr, is_date: &F) -> Result<()> {
    match e {
        FilterExpr::Comp { left, right, .. } => {
            if let Some(c) = date_column(left, is_date).map(str::to_string) { date_literal(right, &c)?; }
            if let Some(c) = date_column(right, is_date).map(str::to_string) { date_literal(left, &c)?; }
        }
        FilterExpr::In { expr, list, .. } => {
            if let Some(c) = date_column(expr, is_date).map(str::to_string) {
                for o in list.iter_mut() { date_literal(o, &c)?; }
            }
        }
        FilterExpr::Between { expr, low, high, .. } => {
            if let Some(c) = date_column(expr, is_date).map(str::to_string) {
                date_literal(low, &c)?;
                date_literal(high, &c)?;
            }
        }
        FilterExpr::Like { .. } | FilterExpr::IsNull { .. } => {}
        FilterExpr::And(a, b) | FilterExpr::Or(a, b) => {
            bind_dates(a, is_date)?;
            bind_dates(b, is_date)?;
        }
        FilterExpr::Not(a) => bind_dates(a, is_date)?,
    }
    Ok(())
}

fn resolve<F: Fn(&str) -> Option<Value>>(o: &Operand, lookup: &F) -> Value {
    match o {
        Operand::Column(c) => lookup(c).unwrap_or(Value::Null),
        Operand::Text(s) => Value::String(s.clone()),
        Operand::Number(n) => serde_json::Number::from_f64(*n).map(Value::Number).unwrap_or(Value::Null),
        Operand::Null => Value::Null,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(*b as i64 as f64),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Numeric when both sides are numeric, text otherwise. `None` when either side is NULL.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if a.is_null() || b.is_null() { return None; }
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(as_text(a).cmp(&as_text(b))),
    }
}

/// SQL LIKE with `%` and `_`, case-insensitive; `\` escapes the next character.
pub fn like(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let (mut ti, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        match p.get(pi) {
            Some('%') => { star = Some((pi, ti)); pi += 1; continue; }
            Some('_') => { ti += 1; pi += 1; continue; }
            Some('\\') if p.get(pi + 1) == Some(&t[ti]) => { ti += 1; pi += 2; continue; }
            Some(c) if *c != '\\' && *c == t[ti] => { ti += 1; pi += 1; continue; }
            _ => {}
        }
        match star {
            Some((sp, st)) => { pi = sp + 1; ti = st + 1; star = Some((sp, st + 1)); }
            None => return false,
        }
    }
    while p.get(pi) == Some(&'%') { pi += 1; }
    pi == p.len()
}

fn eval<F: Fn(&str) -> Option<Value>>(e: &FilterExpr, lookup: &F) -> bool {
    use std::cmp::Ordering::*;
    match e {
        FilterExpr::Comp { left, op, right } => {
            let ord = compare(&resolve(left, lookup), &resolve(right, lookup));
            match (op, ord) {
                (_, None) => false,
                (CompOp::Eq, Some(o)) => o == Equal,
                (CompOp::Ne, Some(o)) => o != Equal,
                (CompOp::Lt, Some(o)) => o == Less,
                (CompOp::Le, Some(o)) => o != Greater,
                (CompOp::Gt, Some(o)) => o == Greater,
                (CompOp::Ge, Some(o)) => o != Less,
            }
        }
        FilterExpr::Like { expr, pattern, negated } => {
            let v = resolve(expr, lookup);
            let p = resolve(pattern, lookup);
            if v.is_null() || p.is_null() { return false; }
            like(&as_text(&v), &as_text(&p)) != *negated
        }
        FilterExpr::In { expr, list, negated } => {
            let v = resolve(expr, lookup);
            if v.is_null() { return false; }
            let hit = list.iter().any(|o| compare(&v, &resolve(o, lookup)) == Some(Equal));
            hit != *negated
        }
        FilterExpr::Between { expr, low, high, negated } => {
            let v = resolve(expr, lookup);
            let lo = compare(&v, &resolve(low, lookup));
            let hi = compare(&v, &resolve(high, lookup));
            match (lo, hi) {
                (Some(l), Some(h)) => (l != Less && h != Greater) != *negated,
                _ => false,
            }
        }
        FilterExpr::IsNull { expr, negated } => resolve(expr, lookup).is_null() != *negated,
        FilterExpr::And(a, b) => eval(a, lookup) && eval(b, lookup),
        FilterExpr::Or(a, b) => eval(a, lookup) || eval(b, lookup),
        FilterExpr::Not(a) => !eval(a, lookup),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn row(v: Value) -> impl Fn(&str) -> Option<Value> {
        let m: Map<String, Value> = v.as_object().cloned().unwrap();
        move |c: &str| m.get(c).cloned()
    }

    #[test]
    fn denylist_rejects_statements_and_comments() {
        for bad in ["1=1; DROP TABLE pages", "header = 'x' -- comment", "uid IN (SELECT uid FROM be_users)", "sleep(5)", "a = 1 /* x */", "1 UNION ALL x"] {
            assert!(Filter::parse(bad).is_err(), "{} should be rejected", bad);
        }
        let err = Filter::parse("colPos = 0; delete").unwrap_err().to_string();
        assert!(err.contains("forbidden"));
    }

    #[test]
    fn precedence_and_over_or() {
        let f = Filter::parse("colPos = 1 OR colPos = 0 AND hidden = 1").unwrap();
        assert!(f.matches(&row(json!({"colPos": 1, "hidden": 0}))));
        assert!(!f.matches(&row(json!({"colPos": 0, "hidden": 0}))));
        let g = Filter::parse("(colPos = 1 OR colPos = 0) AND hidden = 1").unwrap();
        assert!(!g.matches(&row(json!({"colPos": 1, "hidden": 0}))));
    }

    #[test]
    fn like_in_between_and_null() {
        let r = row(json!({"header": "Welcome home", "sorting": 256, "CType": "text", "subheader": null}));
        assert!(Filter::parse("header LIKE 'welcome%'").unwrap().matches(&r));
        assert!(Filter::parse("header NOT LIKE '%team%'").unwrap().matches(&r));
        assert!(Filter::parse("header LIKE 'W_lcome home'").unwrap().matches(&r));
        assert!(Filter::parse("CType IN ('text', 'textmedia')").unwrap().matches(&r));
        assert!(Filter::parse("CType NOT IN ('header')").unwrap().matches(&r));
        assert!(Filter::parse("sorting BETWEEN 100 AND 300").unwrap().matches(&r));
        assert!(!Filter::parse("sorting NOT BETWEEN 100 AND 300").unwrap().matches(&r));
        assert!(Filter::parse("subheader IS NULL AND bodytext IS NULL").unwrap().matches(&r));
        assert!(Filter::parse("NOT header IS NULL").unwrap().matches(&r));
    }

    #[test]
    fn numeric_strings_compare_as_numbers() {
        let r = row(json!({"header_layout": "10"}));
        assert!(Filter::parse("header_layout > 9").unwrap().matches(&r));
        assert!(Filter::parse("header_layout = '10'").unwrap().matches(&r));
    }

    #[test]
    fn quoted_strings_keep_unicode_and_escapes() {
        let r = row(json!({"title": "Über uns", "author": "O'Brien"}));
        assert!(Filter::parse("title = 'Über uns'").unwrap().matches(&r));
        assert!(Filter::parse("author = 'O''Brien'").unwrap().matches(&r));
    }

    #[test]
    fn columns_are_collected() {
        let f = Filter::parse("pid = 2 AND (header LIKE '%a%' OR colPos IN (0, 1))").unwrap();
        assert_eq!(f.columns().into_iter().collect::<Vec<_>>(), vec!["colPos", "header", "pid"]);
    }

    #[test]
    fn syntax_errors_point_at_the_position() {
        let err = Filter::parse("pid = 2 AND").unwrap_err().to_string();
        assert!(err.contains("unexpected end"), "{}", err);
        let err = Filter::parse("pid = 2 header = 'x'").unwrap_err().to_string();
        assert!(err.contains("position 8"), "{}", err);
        assert!(err.contains('^'));
        assert!(Filter::parse("title = 'open").is_err());
        assert!(Filter::parse("").is_err());
    }

    #[test]
    fn deep_nesting_and_long_filters_are_rejected() {
        let nested = format!("{}uid = 500{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(Filter::parse(&nested).is_err());

        let deep = format!("{}uid = 500{}", "(".repeat(MAX_FILTER_DEPTH + 1), ")".repeat(MAX_FILTER_DEPTH + 1));
        let err = Filter::parse(&deep).unwrap_err().to_string();
        assert!(err.contains("nested too deeply"), "{}", err);
        let nots = format!("{}uid = 500", "NOT ".repeat(MAX_FILTER_DEPTH + 1));
        assert!(Filter::parse(&nots).unwrap_err().to_string().contains("nested too deeply"));

        let shallow = format!("{}uid = 500{}", "(".repeat(10), ")".repeat(10));
        assert!(Filter::parse(&shallow).unwrap().matches(&row(json!({"uid": 500}))));

        let long = format!("header = '{}'", "x".repeat(MAX_FILTER_LEN));
        assert!(Filter::parse(&long).unwrap_err().to_string().contains("too long"));
    }

    #[test]
    fn iso_literals_compare_against_date_columns() {
        let is_date = |c: &str| c == "date";
        let r = row(json!({"date": 1705314600, "header": "2024-01-01"}));
        let mut f = Filter::parse("date > '2024-01-01' AND date < '2024-02-01T00:00:00Z'").unwrap();
        f.bind_dates(&is_date).unwrap();
        assert!(f.matches(&r));
        let mut g = Filter::parse("date BETWEEN '2023-01-01' AND '2023-12-31'").unwrap();
        g.bind_dates(&is_date).unwrap();
        assert!(!g.matches(&r));
        // text columns keep text semantics
        let mut h = Filter::parse("header = '2024-01-01'").unwrap();
        h.bind_dates(&is_date).unwrap();
        assert!(h.matches(&r));

        let mut bad = Filter::parse("date > 'last week'").unwrap();
        let err = bad.bind_dates(&is_date).unwrap_err().to_string();
        assert!(err.contains("not an ISO-8601 date"), "{}", err);
    }
}
