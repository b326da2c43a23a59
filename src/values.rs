//! Value conversions shared by the validator and the read path.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Parse an ISO-8601 date or date-time into epoch seconds. Inputs without an offset are UTC.
pub fn iso_to_epoch(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&n).timestamp());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| Utc.from_utc_datetime(&n).timestamp())
}

/// Epoch seconds as an RFC 3339 UTC string; `0` means unset.
pub fn epoch_to_iso(ts: i64) -> Option<String> {
    if ts == 0 { return None; }
    DateTime::<Utc>::from_timestamp(ts, 0).map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Stored date column to its JSON form.
pub fn date_value(v: &Value) -> Value {
    match as_i64(v).and_then(epoch_to_iso) {
        Some(s) => Value::String(s),
        None => Value::Null,
    }
}

/// Lenient integer view of a stored or submitted value.
pub fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// Text form used for substring search and string comparisons.
pub fn as_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A value that counts as "not set" for translation fallback.
pub fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Split a stored CSV of uids; junk entries are skipped.
pub fn csv_uids(v: &Value) -> Vec<u32> {
    match v {
        Value::Number(n) => n.as_u64().filter(|n| *n > 0).map(|n| vec![n as u32]).unwrap_or_default(),
        Value::String(s) => s.split(',').filter_map(|p| p.trim().parse::<u32>().ok()).filter(|n| *n > 0).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iso_round_trips_through_epoch() {
        let ts = iso_to_epoch("2024-01-15T10:30:00Z").unwrap();
        assert_eq!(ts, 1705314600);
        assert_eq!(epoch_to_iso(ts).as_deref(), Some("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn offsets_and_naive_forms_are_accepted() {
        assert_eq!(iso_to_epoch("2024-01-15T11:30:00+01:00"), Some(1705314600));
        assert_eq!(iso_to_epoch("2024-01-15 10:30:00"), Some(1705314600));
        assert_eq!(iso_to_epoch("2024-01-15"), Some(1705276800));
        assert_eq!(iso_to_epoch("15.01.2024"), None);
    }

    #[test]
    fn zero_epoch_is_null() {
        assert_eq!(date_value(&json!(0)), Value::Null);
        assert_eq!(date_value(&json!("1705314600")), json!("2024-01-15T10:30:00Z"));
    }

    #[test]
    fn csv_uids_skip_junk() {
        assert_eq!(csv_uids(&json!("3, 1,x,0")), vec![3, 1]);
        assert_eq!(csv_uids(&json!(7)), vec![7]);
        assert!(csv_uids(&Value::Null).is_empty());
    }
}
