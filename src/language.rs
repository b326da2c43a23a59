//!
//! cmsbridge language mapping
//! --------------------------
//! Maps ISO-639-1 codes to the numeric language ids stored in records, using the site
//! configuration as the only source of truth. Lookups fail closed: an unknown code never
//! silently falls back to the default language.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::FieldError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteLanguage {
    pub language_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub locale: String,
    #[serde(rename = "iso-639-1", default, skip_serializing_if = "Option::is_none")]
    pub iso_639_1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hreflang: Option<String>,
    #[serde(default)]
    pub base: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

fn enabled_default() -> bool { true }

impl SiteLanguage {
    /// Explicit `iso-639-1`, else the locale prefix, else the hreflang prefix.
    pub fn iso_code(&self) -> Option<String> {
        fn prefix(s: &str) -> Option<String> {
            let p = s.split(['_', '-', '.']).next().unwrap_or("").trim();
            if p.len() >= 2 && p.chars().all(|c| c.is_ascii_alphabetic()) { Some(p.to_ascii_lowercase()) } else { None }
        }
        if let Some(code) = self.iso_639_1.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            return Some(code.to_ascii_lowercase());
        }
        prefix(&self.locale).or_else(|| self.hreflang.as_deref().and_then(prefix))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub identifier: String,
    pub root_page_id: u32,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub languages: Vec<SiteLanguage>,
}

impl Site {
    pub fn language(&self, id: i64) -> Option<&SiteLanguage> {
        self.languages.iter().find(|l| l.language_id == id && l.enabled)
    }
}

pub fn load_sites(path: &Path) -> anyhow::Result<Vec<Site>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read site configuration: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("While parsing site configuration: {}", path.display()))
}

#[derive(Debug, Clone, Default)]
pub struct LanguageMapping {
    by_code: BTreeMap<String, i64>,
    by_id: BTreeMap<i64, String>,
}

impl LanguageMapping {
    pub fn from_sites(sites: &[Site]) -> Self {
        let mut m = LanguageMapping::default();
        for site in sites {
            for lang in site.languages.iter().filter(|l| l.enabled) {
                let Some(code) = lang.iso_code() else { continue; };
                // first site wins
                m.by_code.entry(code.clone()).or_insert(lang.language_id);
                m.by_id.entry(lang.language_id).or_insert(code);
            }
        }
        m
    }

    pub fn uid_from_iso_code(&self, code: &str) -> Option<i64> {
        self.by_code.get(&code.trim().to_ascii_lowercase()).copied()
    }

    pub fn iso_code_from_uid(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(|s| s.as_str())
    }

    pub fn available_iso_codes(&self) -> Vec<&str> {
        // ordered by language id so the default comes first
        self.by_id.values().map(|s| s.as_str()).collect()
    }

    pub fn default_iso_code(&self) -> Option<&str> {
        self.iso_code_from_uid(0)
    }

    /// Numeric tokens pass through; anything else must be a configured ISO code.
    pub fn resolve(&self, token: &Value) -> Result<i64, FieldError> {
        match token {
            Value::Number(n) => n.as_i64().ok_or_else(|| self.unknown(&n.to_string())),
            Value::String(s) => {
                let t = s.trim();
                if let Ok(n) = t.parse::<i64>() { return Ok(n); }
                self.uid_from_iso_code(t).ok_or_else(|| self.unknown(t))
            }
            other => Err(self.unknown(&other.to_string())),
        }
    }

    fn unknown(&self, code: &str) -> FieldError {
        FieldError::UnknownLanguage { field: None, code: code.to_string(), available: self.available_iso_codes().join(", ") }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping() -> LanguageMapping {
        let sites: Vec<Site> = serde_json::from_str(include_str!("../tests/fixtures/sites.json")).unwrap();
        LanguageMapping::from_sites(&sites)
    }

    #[test]
    fn codes_come_from_iso_locale_or_hreflang() {
        let m = mapping();
        assert_eq!(m.uid_from_iso_code("en"), Some(0));
        assert_eq!(m.uid_from_iso_code("DE"), Some(1));
        assert_eq!(m.uid_from_iso_code("fr"), Some(2));
        // disabled language is not mapped
        assert_eq!(m.uid_from_iso_code("da"), None);
        assert_eq!(m.default_iso_code(), Some("en"));
        assert_eq!(m.available_iso_codes(), vec!["en", "de", "fr"]);
    }

    #[test]
    fn resolve_accepts_numbers_and_codes() {
        let m = mapping();
        assert_eq!(m.resolve(&json!(1)).unwrap(), 1);
        assert_eq!(m.resolve(&json!("2")).unwrap(), 2);
        assert_eq!(m.resolve(&json!("de")).unwrap(), 1);
    }

    #[test]
    fn unknown_code_fails_closed() {
        let m = mapping();
        let err = m.resolve(&json!("xx")).unwrap_err().to_string();
        assert!(err.contains("Unknown language code: xx"), "{}", err);
        assert!(err.contains("en, de, fr"), "{}", err);
    }

    #[test]
    fn first_site_wins_on_duplicate_codes() {
        let a = Site { identifier: "a".into(), root_page_id: 1, base: "/".into(), languages: vec![
            SiteLanguage { language_id: 5, title: "Deutsch".into(), locale: "de_AT.UTF-8".into(), iso_639_1: None, hreflang: None, base: "/".into(), enabled: true },
        ]};
        let b = Site { identifier: "b".into(), root_page_id: 2, base: "/".into(), languages: vec![
            SiteLanguage { language_id: 1, title: "Deutsch".into(), locale: "de_DE.UTF-8".into(), iso_639_1: None, hreflang: None, base: "/".into(), enabled: true },
        ]};
        let m = LanguageMapping::from_sites(&[a, b]);
        assert_eq!(m.uid_from_iso_code("de"), Some(5));
    }
}
