//! Table and field access policy.
//!
//! Pure schema inspection: every check answers with a boolean or an empty list and never
//! fails. Callers turn a `false` into [`AppError::table_unavailable`](crate::error::AppError)
//! so that restricted and missing tables look the same from outside.

use std::sync::Arc;

use crate::config::AccessRules;
use crate::schema::{FieldConfig, SchemaRegistry, TableSchema};

#[derive(Debug, Clone)]
pub struct TableAccess {
    schema: Arc<SchemaRegistry>,
    rules: AccessRules,
    is_admin: bool,
}

impl TableAccess {
    pub fn new(schema: Arc<SchemaRegistry>, rules: AccessRules, is_admin: bool) -> Self {
        Self { schema, rules, is_admin }
    }

    pub fn schema(&self) -> &SchemaRegistry { &self.schema }

    /// Schema for `table` when the acting principal may use it.
    pub fn table(&self, table: &str) -> Option<&TableSchema> {
        if self.can_access_table(table) { self.schema.table(table) } else { None }
    }

    pub fn can_access_table(&self, table: &str) -> bool {
        let Some(t) = self.schema.table(table) else { return false; };
        if self.rules.restricted_tables.iter().any(|r| r == table) { return false; }
        if let Some(allow) = &self.rules.allowed_tables {
            if !allow.iter().any(|a| a == table) { return false; }
        }
        if !t.ctrl.versioning_ws { return false; }
        if t.ctrl.admin_only && !self.is_admin { return false; }
        true
    }

    pub fn can_access_field(&self, table: &str, field: &str) -> bool {
        let Some(f) = self.schema.table(table).and_then(|t| t.field(field)) else { return false; };
        self.field_allowed(f)
    }

    fn field_allowed(&self, f: &FieldConfig) -> bool {
        if f.is_file() { return false; }
        match f.relation() {
            Some(rel) => rel.foreign_tables.iter().all(|ft| self.can_access_table(ft)),
            None => true,
        }
    }

    /// Accessible fields applicable to `subtype` in schema order; all fields when `None`.
    pub fn available_fields(&self, table: &str, subtype: Option<&str>) -> Vec<&FieldConfig> {
        let Some(t) = self.table(table) else { return Vec::new(); };
        t.fields_for_type(subtype)
            .into_iter()
            .filter_map(|name| t.field(name))
            .filter(|f| self.field_allowed(f))
            .collect()
    }

    /// Independently readable through the record tools.
    pub fn is_addressable(&self, table: &str) -> bool {
        self.table(table).map(|t| !t.ctrl.hide_table).unwrap_or(false)
    }

    /// Accessible tables in name order.
    pub fn accessible_tables(&self) -> Vec<&TableSchema> {
        self.schema.tables().filter(|t| self.can_access_table(&t.name)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(rules: AccessRules, admin: bool) -> TableAccess {
        let reg = SchemaRegistry::from_json_str(include_str!("../tests/fixtures/schema.json")).unwrap();
        TableAccess::new(Arc::new(reg), rules, admin)
    }

    #[test]
    fn restricted_unversioned_and_unknown_tables_are_denied() {
        let a = access(AccessRules::default(), true);
        assert!(a.can_access_table("tt_content"));
        assert!(!a.can_access_table("be_users"));
        assert!(!a.can_access_table("sys_note"));
        assert!(!a.can_access_table("tx_does_not_exist"));
    }

    #[test]
    fn admin_only_needs_admin() {
        let rules = AccessRules { restricted_tables: vec![], allowed_tables: None };
        // be_users is also unversioned, so even admins are denied
        assert!(!access(rules.clone(), true).can_access_table("be_users"));
        assert!(access(rules, false).can_access_table("pages"));
    }

    #[test]
    fn allow_list_narrows_tables_and_relations() {
        let rules = AccessRules { allowed_tables: Some(vec!["tt_content".into()]), ..AccessRules::default() };
        let a = access(rules, false);
        assert!(a.can_access_table("tt_content"));
        assert!(!a.can_access_table("pages"));
        // categories point at sys_category which is not allowed
        assert!(!a.can_access_field("tt_content", "categories"));
        assert!(a.can_access_field("tt_content", "records"));
    }

    #[test]
    fn file_fields_are_never_accessible() {
        let a = access(AccessRules::default(), false);
        assert!(!a.can_access_field("tt_content", "image"));
        assert!(!a.can_access_field("tt_content", "assets"));
        let fields: Vec<&str> = a.available_fields("tt_content", Some("textmedia")).iter().map(|f| f.name.as_str()).collect();
        assert!(fields.contains(&"bodytext"));
        assert!(!fields.contains(&"image"));
    }

    #[test]
    fn hidden_tables_are_accessible_but_not_addressable() {
        let a = access(AccessRules::default(), false);
        assert!(a.can_access_table("tx_news_domain_model_link"));
        assert!(!a.is_addressable("tx_news_domain_model_link"));
        assert!(a.is_addressable("tt_content"));
    }
}
