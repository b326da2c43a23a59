//! Typed access to the flat JSON parameter map of a tool call.

use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::values::as_i64;

pub type Params = Map<String, Value>;

fn present<'p>(p: &'p Params, name: &str) -> Option<&'p Value> {
    p.get(name).filter(|v| !v.is_null())
}

pub fn opt_str<'p>(p: &'p Params, name: &str) -> AppResult<Option<&'p str>> {
    match present(p, name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(AppError::invalid_param(name, format!("Parameter \"{}\" must be a string", name))),
    }
}

pub fn req_str<'p>(p: &'p Params, name: &str) -> AppResult<&'p str> {
    match opt_str(p, name)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(AppError::invalid_param(name, format!("Parameter \"{}\" is required", name))),
    }
}

/// Positive integer given as a JSON number or a numeric string.
pub fn opt_uid(p: &Params, name: &str) -> AppResult<Option<u32>> {
    let Some(v) = present(p, name) else { return Ok(None); };
    match as_i64(v) {
        Some(n) if n > 0 && n <= u32::MAX as i64 && !v.is_boolean() => Ok(Some(n as u32)),
        _ => Err(AppError::invalid_param(name, format!("Parameter \"{}\" must be a positive integer", name))),
    }
}

pub fn req_uid(p: &Params, name: &str) -> AppResult<u32> {
    opt_uid(p, name)?.ok_or_else(|| AppError::invalid_param(name, format!("Parameter \"{}\" is required", name)))
}

/// Non-negative integer; `pid` and `pageId` may be 0.
pub fn opt_u32(p: &Params, name: &str) -> AppResult<Option<u32>> {
    let Some(v) = present(p, name) else { return Ok(None); };
    match as_i64(v) {
        Some(n) if n >= 0 && n <= u32::MAX as i64 && !v.is_boolean() => Ok(Some(n as u32)),
        _ => Err(AppError::invalid_param(name, format!("Parameter \"{}\" must be a non-negative integer", name))),
    }
}

pub fn opt_usize(p: &Params, name: &str) -> AppResult<Option<usize>> {
    Ok(opt_u32(p, name)?.map(|n| n as usize))
}

pub fn opt_bool(p: &Params, name: &str) -> AppResult<bool> {
    match present(p, name) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => crate::config::parse_bool(s)
            .ok_or_else(|| AppError::invalid_param(name, format!("Parameter \"{}\" must be a boolean", name))),
        Some(Value::Number(n)) => Ok(n.as_i64().unwrap_or(0) != 0),
        Some(_) => Err(AppError::invalid_param(name, format!("Parameter \"{}\" must be a boolean", name))),
    }
}

/// A list of uids: JSON array, CSV string or single number.
pub fn opt_uid_list(p: &Params, name: &str) -> AppResult<Option<Vec<u32>>> {
    let Some(v) = present(p, name) else { return Ok(None); };
    let bad = || AppError::invalid_param(name, format!("Parameter \"{}\" must be an array of positive integers", name));
    let items: Vec<Value> = match v {
        Value::Array(a) => a.clone(),
        Value::String(s) => s.split(',').map(|x| Value::String(x.trim().to_string())).collect(),
        Value::Number(_) => vec![v.clone()],
        _ => return Err(bad()),
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items.iter() {
        match as_i64(item) {
            Some(n) if n > 0 && n <= u32::MAX as i64 => out.push(n as u32),
            _ => return Err(bad()),
        }
    }
    if out.is_empty() { return Err(bad()); }
    Ok(Some(out))
}

pub fn opt_str_list(p: &Params, name: &str) -> AppResult<Option<Vec<String>>> {
    let Some(v) = present(p, name) else { return Ok(None); };
    match v {
        Value::Array(a) => a.iter()
            .map(|x| x.as_str().map(|s| s.trim().to_string()))
            .collect::<Option<Vec<String>>>()
            .map(Some)
            .ok_or_else(|| AppError::invalid_param(name, format!("Parameter \"{}\" must be an array of strings", name))),
        Value::String(s) => Ok(Some(s.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect())),
        _ => Err(AppError::invalid_param(name, format!("Parameter \"{}\" must be an array of strings", name))),
    }
}

pub fn opt_object<'p>(p: &'p Params, name: &str) -> AppResult<Option<&'p Map<String, Value>>> {
    match present(p, name) {
        None => Ok(None),
        Some(Value::Object(m)) => Ok(Some(m)),
        Some(_) => Err(AppError::invalid_param(name, format!("Parameter \"{}\" must be an object", name))),
    }
}

pub fn req_object<'p>(p: &'p Params, name: &str) -> AppResult<&'p Map<String, Value>> {
    opt_object(p, name)?.ok_or_else(|| AppError::invalid_param(name, format!("Parameter \"{}\" is required", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Params { v.as_object().cloned().unwrap() }

    #[test]
    fn uids_accept_numbers_and_numeric_strings() {
        let p = params(json!({"uid": "12", "pid": 0, "bad": -1, "flag": true}));
        assert_eq!(opt_uid(&p, "uid").unwrap(), Some(12));
        assert_eq!(opt_u32(&p, "pid").unwrap(), Some(0));
        assert!(opt_uid(&p, "pid").is_err());
        assert!(opt_uid(&p, "bad").is_err());
        assert!(opt_uid(&p, "flag").is_err());
        assert_eq!(opt_uid(&p, "missing").unwrap(), None);
    }

    #[test]
    fn uid_lists_come_in_several_shapes() {
        let p = params(json!({"a": [1, "2"], "b": "3, 4", "c": 5, "d": [0], "e": []}));
        assert_eq!(opt_uid_list(&p, "a").unwrap(), Some(vec![1, 2]));
        assert_eq!(opt_uid_list(&p, "b").unwrap(), Some(vec![3, 4]));
        assert_eq!(opt_uid_list(&p, "c").unwrap(), Some(vec![5]));
        assert!(opt_uid_list(&p, "d").is_err());
        assert!(opt_uid_list(&p, "e").is_err());
    }

    #[test]
    fn required_parameters_name_themselves() {
        let err = req_str(&params(json!({})), "table").unwrap_err();
        assert_eq!(err.code_str(), "invalid_param:table");
        assert_eq!(err.message(), "Parameter \"table\" is required");
    }
}
