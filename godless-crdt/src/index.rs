//! The persisted manifest.
//!
//! An [`Index`] maps each table to the set of chunk links contributing rows
//! to it. The index is itself a CRDT (per-table set union), so two peers'
//! manifests merge without coordination; the namespace is rematerialized by
//! loading and joining every linked chunk.

use std::collections::{btree_map, BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::link::Link;
use crate::namespace::TableName;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Index {
    tables: BTreeMap<TableName, BTreeSet<Link>>,
}

impl Index {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from table/link-set pairs, unioning duplicates.
    pub fn make<I, L>(tables: I) -> Self
    where
        I: IntoIterator<Item = (TableName, L)>,
        L: IntoIterator<Item = Link>,
    {
        let mut index = Index::empty();
        for (table, links) in tables {
            for link in links {
                index.insert(table.clone(), link);
            }
        }
        index
    }

    fn insert(&mut self, table: TableName, link: Link) {
        match self.tables.entry(table) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(BTreeSet::from([link]));
            }
            btree_map::Entry::Occupied(mut slot) => {
                slot.get_mut().insert(link);
            }
        }
    }

    pub fn join(&self, other: &Index) -> Index {
        let mut joined = self.clone();
        for (table, links) in &other.tables {
            for link in links {
                joined.insert(table.clone(), link.clone());
            }
        }
        joined
    }

    /// A new index with `link` recorded for `table`; the receiver is
    /// unchanged.
    pub fn join_link(&self, table: TableName, link: Link) -> Index {
        let mut joined = self.clone();
        joined.insert(table, link);
        joined
    }

    pub fn links(&self, table: &TableName) -> Option<&BTreeSet<Link>> {
        self.tables.get(table)
    }

    /// Tables in lexicographic order with their link sets.
    pub fn tables(&self) -> impl Iterator<Item = (&TableName, &BTreeSet<Link>)> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    /// Every distinct link in the index, deduplicated across tables.
    pub fn all_links(&self) -> BTreeSet<Link> {
        self.tables.values().flatten().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}
