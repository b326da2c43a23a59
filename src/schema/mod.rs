//!
//! cmsbridge schema registry
//! -------------------------
//! Typed, read-only view over the CMS table configuration (TCA). The registry is loaded
//! once from JSON and then handed by reference to the access policy, the validator and the
//! record engines, so no component ever inspects raw configuration on its own.
//!
//! A table carries its control section (`ctrl`), its column definitions and a set of record
//! types. Each type expands to an ordered list of applicable field names; palettes and tab
//! dividers in `showitem` are flattened during loading.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

mod loader;

pub use loader::SchemaError;

/// Names of the enable columns declared in `ctrl.enablecolumns`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnableColumns {
    pub disabled: Option<String>,
    pub starttime: Option<String>,
    pub endtime: Option<String>,
    pub fe_group: Option<String>,
}

/// Table control section. Field names follow the TCA keys so schema files can be written
/// by hand from an existing installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TableCtrl {
    pub title: String,
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub type_field: Option<String>,
    pub language_field: Option<String>,
    pub trans_orig_pointer_field: Option<String>,
    pub sortby: Option<String>,
    #[serde(rename = "default_sortby")]
    pub default_sortby: Option<String>,
    pub delete: Option<String>,
    pub enablecolumns: EnableColumns,
    #[serde(rename = "versioningWS")]
    pub versioning_ws: bool,
    pub search_fields: Option<String>,
    pub root_level: i8,
    pub hide_table: bool,
    pub admin_only: bool,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MmShape {
    /// Owner sits on `uid_local`; ordered by `sorting`.
    Standard,
    /// Owner sits on `uid_foreign`; ordered by `sorting_foreign`.
    Opposite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MmRelation {
    pub mm_table: String,
    pub shape: MmShape,
    /// Extra columns identifying the owner when the junction table is shared,
    /// typically `tablenames` and `fieldname`.
    pub match_fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineRelation {
    pub foreign_field: String,
    pub foreign_table_field: Option<String>,
    pub foreign_sortby: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelationShape {
    /// CSV of uids stored on the owning row.
    Direct,
    ManyToMany(MmRelation),
    Inline(InlineRelation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// One entry for select/inline/category, possibly several for group fields.
    pub foreign_tables: Vec<String>,
    pub shape: RelationShape,
    pub maxitems: Option<u32>,
}

impl Relation {
    pub fn shape_label(&self) -> &'static str {
        match self.shape {
            RelationShape::Direct => "direct",
            RelationShape::ManyToMany(_) => "mm",
            RelationShape::Inline(_) => "inline",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text { max: Option<usize> },
    Number,
    /// Stored as epoch seconds.
    Date,
    Check,
    /// Static item list.
    Select { items: Vec<String>, multiple: bool },
    Language,
    Relation(Relation),
    /// File attachments are never exposed.
    File,
    Passthrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldConfig {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    pub l10n_mode: Option<String>,
}

impl FieldConfig {
    pub fn relation(&self) -> Option<&Relation> {
        match &self.kind { FieldKind::Relation(r) => Some(r), _ => None }
    }
    pub fn is_relation(&self) -> bool { matches!(self.kind, FieldKind::Relation(_)) }
    pub fn is_file(&self) -> bool { matches!(self.kind, FieldKind::File) }
    pub fn is_date(&self) -> bool { matches!(self.kind, FieldKind::Date) }

    /// Values of this field come from the source record on translations.
    pub fn inherits_from_source(&self) -> bool {
        self.l10n_mode.as_deref() == Some("exclude")
    }

    pub fn kind_label(&self) -> &'static str {
        match &self.kind {
            FieldKind::Text { .. } => "text",
            FieldKind::Number => "number",
            FieldKind::Date => "datetime",
            FieldKind::Check => "check",
            FieldKind::Select { multiple: true, .. } => "select_multiple",
            FieldKind::Select { .. } => "select",
            FieldKind::Language => "language",
            FieldKind::Relation(_) => "relation",
            FieldKind::File => "file",
            FieldKind::Passthrough => "passthrough",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub ctrl: TableCtrl,
    pub fields: BTreeMap<String, FieldConfig>,
    /// type key -> ordered applicable field names
    pub types: BTreeMap<String, Vec<String>>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldConfig> { self.fields.get(name) }

    pub fn type_field(&self) -> Option<&str> { self.ctrl.type_field.as_deref() }
    pub fn language_field(&self) -> Option<&str> { self.ctrl.language_field.as_deref() }
    pub fn translation_parent_field(&self) -> Option<&str> { self.ctrl.trans_orig_pointer_field.as_deref() }
    pub fn delete_field(&self) -> Option<&str> { self.ctrl.delete.as_deref() }
    pub fn label_field(&self) -> Option<&str> { self.ctrl.label.as_deref() }

    pub fn is_translatable(&self) -> bool {
        self.language_field().is_some() && self.translation_parent_field().is_some()
    }

    /// `sortby` when manual sorting is enabled, else the first column of `default_sortby`.
    pub fn sort_field(&self) -> Option<&str> {
        if let Some(s) = self.ctrl.sortby.as_deref() { return Some(s); }
        let ds = self.ctrl.default_sortby.as_deref()?;
        let ds = ds.trim();
        let ds = match ds.get(..8) { Some(p) if p.eq_ignore_ascii_case("ORDER BY") => &ds[8..], _ => ds };
        ds.split(',').next().and_then(|c| c.split_whitespace().next())
    }

    pub fn search_fields(&self) -> Vec<&str> {
        self.ctrl.search_fields.as_deref().unwrap_or("")
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty() && self.fields.contains_key(*s))
            .collect()
    }

    /// Columns owned by the control section; applicable to every record type.
    pub fn control_fields(&self) -> Vec<&str> {
        let e = &self.ctrl.enablecolumns;
        [
            self.ctrl.type_field.as_deref(),
            self.ctrl.language_field.as_deref(),
            e.disabled.as_deref(),
            e.starttime.as_deref(),
            e.endtime.as_deref(),
            e.fe_group.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|f| self.fields.contains_key(*f))
        .collect()
    }

    pub fn default_type(&self) -> Option<&str> {
        ["1", "0"].into_iter()
            .find(|k| self.types.contains_key(*k))
            .or_else(|| self.types.keys().next().map(|k| k.as_str()))
    }

    /// Map a stored/requested type value to a declared type key, falling back to the default type.
    pub fn resolve_type_key(&self, subtype: Option<&str>) -> Option<&str> {
        match subtype {
            Some(s) if self.types.contains_key(s) => self.types.get_key_value(s).map(|(k, _)| k.as_str()),
            _ => self.default_type(),
        }
    }

    /// Ordered field names applicable to `subtype`; all fields when no subtype is given.
    pub fn fields_for_type(&self, subtype: Option<&str>) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        match subtype.and_then(|s| self.resolve_type_key(Some(s))) {
            Some(key) => {
                for c in self.control_fields() { if !out.contains(&c) { out.push(c); } }
                if let Some(list) = self.types.get(key) {
                    for f in list { if !out.contains(&f.as_str()) { out.push(f.as_str()); } }
                }
            }
            None => out.extend(self.fields.keys().map(|k| k.as_str())),
        }
        out
    }

    pub fn is_field_in_type(&self, subtype: Option<&str>, field: &str) -> bool {
        self.fields_for_type(subtype).contains(&field)
    }
}

/// An inline field on some table that owns records of another table.
#[derive(Debug, Clone)]
pub struct InlineOwner<'a> {
    pub table: &'a str,
    pub field: &'a str,
    pub relation: &'a InlineRelation,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub fn table(&self, name: &str) -> Option<&TableSchema> { self.tables.get(name) }
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> { self.tables.values() }
    pub fn table_names(&self) -> Vec<&str> { self.tables.keys().map(|k| k.as_str()).collect() }

    /// Inline fields across all tables whose children live in `child_table`.
    pub fn inline_owners(&self, child_table: &str) -> Vec<InlineOwner<'_>> {
        let mut out = Vec::new();
        for t in self.tables.values() {
            for f in t.fields.values() {
                if let Some(rel) = f.relation() {
                    if let RelationShape::Inline(inline) = &rel.shape {
                        if rel.foreign_tables.iter().any(|ft| ft == child_table) {
                            out.push(InlineOwner { table: t.name.as_str(), field: f.name.as_str(), relation: inline });
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> SchemaRegistry {
        SchemaRegistry::from_json_str(include_str!("../../tests/fixtures/schema.json")).unwrap()
    }

    #[test]
    fn showitem_palettes_and_dividers_are_flattened() {
        let reg = fixture();
        let tt = reg.table("tt_content").unwrap();
        let text = tt.fields_for_type(Some("text"));
        assert!(text.contains(&"header"));
        assert!(text.contains(&"bodytext"));
        // palette member
        assert!(text.contains(&"header_layout"));
        assert!(!text.iter().any(|f| f.starts_with("--")));
        // control columns are always applicable
        assert!(text.contains(&"sys_language_uid"));
        assert!(text.contains(&"hidden"));
    }

    #[test]
    fn unknown_type_falls_back_to_default_type() {
        let reg = fixture();
        let tt = reg.table("tt_content").unwrap();
        assert_eq!(tt.resolve_type_key(Some("does_not_exist")), tt.default_type());
        assert_eq!(tt.resolve_type_key(Some("textmedia")), Some("textmedia"));
    }

    #[test]
    fn no_subtype_means_every_field() {
        let reg = fixture();
        let tt = reg.table("tt_content").unwrap();
        assert_eq!(tt.fields_for_type(None).len(), tt.fields.len());
    }

    #[test]
    fn category_fields_become_opposite_mm_relations() {
        let reg = fixture();
        let cat = reg.table("tt_content").unwrap().field("categories").unwrap();
        let rel = cat.relation().unwrap();
        assert_eq!(rel.foreign_tables, vec!["sys_category".to_string()]);
        match &rel.shape {
            RelationShape::ManyToMany(mm) => {
                assert_eq!(mm.mm_table, "sys_category_record_mm");
                assert_eq!(mm.shape, MmShape::Opposite);
                assert_eq!(mm.match_fields.get("tablenames").map(|s| s.as_str()), Some("tt_content"));
                assert_eq!(mm.match_fields.get("fieldname").map(|s| s.as_str()), Some("categories"));
            }
            other => panic!("expected mm relation, got {:?}", other),
        }
    }

    #[test]
    fn file_references_are_file_fields() {
        let reg = fixture();
        assert!(reg.table("tt_content").unwrap().field("image").unwrap().is_file());
    }

    #[test]
    fn inline_owners_are_discovered() {
        let reg = fixture();
        let owners = reg.inline_owners("tx_news_domain_model_link");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].table, "tx_news_domain_model_news");
        assert_eq!(owners[0].relation.foreign_field, "parent");
    }

    #[test]
    fn sort_field_prefers_sortby_then_default_sortby() {
        let reg = fixture();
        assert_eq!(reg.table("tt_content").unwrap().sort_field(), Some("sorting"));
        assert_eq!(reg.table("tx_news_domain_model_news").unwrap().sort_field(), Some("datetime"));
    }
}
