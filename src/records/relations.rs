//! Relation resolution for the read path.

use std::collections::HashSet;

use tracing::debug;

use super::session::{Session, VisibleRecord};
use crate::schema::{FieldConfig, InlineRelation, MmRelation, Relation, RelationShape, TableSchema};
use crate::values::as_text;

/// A resolved relation field.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Ordered caller-visible uids of one foreign table.
    Uids(Vec<u32>),
    /// Entries of a field that may point into several tables.
    Refs(Vec<(String, u32)>),
    /// Inline children that are not readable on their own.
    Embedded { table: String, records: Vec<VisibleRecord> },
}

pub struct RelationResolver<'a> {
    session: &'a Session,
}

impl<'a> RelationResolver<'a> {
    pub fn new(session: &'a Session) -> Self { Self { session } }

    pub fn resolve(&self, table: &TableSchema, field: &FieldConfig, rec: &VisibleRecord) -> Option<Resolved> {
        let rel = field.relation()?;
        let out = match &rel.shape {
            RelationShape::Direct => self.direct(field, rel, rec),
            RelationShape::ManyToMany(mm) => self.many_to_many(rel, mm, rec),
            RelationShape::Inline(inline) => self.inline(table, rel, inline, rec)?,
        };
        Some(out)
    }

    fn direct(&self, field: &FieldConfig, rel: &Relation, rec: &VisibleRecord) -> Resolved {
        let raw = rec.row.get(&field.name).map(as_text).unwrap_or_default();
        let parts = raw.split(',').map(|p| p.trim()).filter(|p| !p.is_empty());
        if rel.foreign_tables.len() <= 1 {
            let uids = parts.filter_map(|p| p.parse::<u32>().ok()).filter(|u| *u > 0).collect();
            return Resolved::Uids(uids);
        }
        // plain numbers point into the first allowed table
        let first = rel.foreign_tables.first().cloned().unwrap_or_default();
        let refs = parts
            .filter_map(|p| match p.parse::<u32>() {
                Ok(u) => Some((first.clone(), u)),
                Err(_) => p.rsplit_once('_').and_then(|(t, u)| u.parse::<u32>().ok().map(|u| (t.to_string(), u))),
            })
            .filter(|(t, u)| *u > 0 && rel.foreign_tables.iter().any(|ft| ft == t))
            .collect();
        Resolved::Refs(refs)
    }

    fn many_to_many(&self, rel: &Relation, mm: &MmRelation, rec: &VisibleRecord) -> Resolved {
        let owner = rec.storage_uid();
        let mut rows: Vec<_> = self.session.backend().mm_rows(&mm.mm_table)
            .into_iter()
            .filter(|r| r.owner(mm.shape) == owner && r.matches(mm))
            .collect();
        rows.sort_by_key(|r| (r.position(mm.shape), r.target(mm.shape)));
        let visible: HashSet<u32> = rel.foreign_tables.first()
            .and_then(|ft| self.session.schema().table(ft))
            .map(|ft| self.session.records(ft).into_iter().map(|r| r.uid).collect())
            .unwrap_or_default();
        let uids = rows.iter().map(|r| r.target(mm.shape)).filter(|u| visible.contains(u)).collect();
        Resolved::Uids(uids)
    }

    fn inline(&self, table: &TableSchema, rel: &Relation, inline: &InlineRelation, rec: &VisibleRecord) -> Option<Resolved> {
        let child_name = rel.foreign_tables.first()?;
        let child = self.session.schema().table(child_name)?;
        let sort = inline.foreign_sortby.as_deref().or_else(|| child.sort_field());
        let mut children: Vec<VisibleRecord> = self.session.records(child)
            .into_iter()
            .filter(|c| c.int(&inline.foreign_field) == rec.uid as i64)
            .filter(|c| match &inline.foreign_table_field {
                Some(tf) => c.row.get(tf).map(as_text).map(|t| t == table.name).unwrap_or(false),
                None => true,
            })
            .collect();
        children.sort_by_key(|c| (sort.map(|s| c.int(s)).unwrap_or(0), c.uid));
        if self.session.access().is_addressable(child_name) {
            return Some(Resolved::Uids(children.into_iter().map(|c| c.uid).collect()));
        }
        debug!(target: "cmsbridge::read", "embedding {} '{}' children of {}:{}", children.len(), child_name, table.name, rec.uid);
        Some(Resolved::Embedded { table: child_name.clone(), records: children })
    }
}
