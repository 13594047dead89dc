//! The CRDT hierarchy: namespaces contain tables, tables contain rows, rows
//! contain named entries, and an entry is a set of points.
//!
//! Every level is a join-semilattice. `join` is commutative, associative and
//! idempotent, and the empty value is the identity. All values are immutable
//! after construction: mutation means building a new joined value.

use std::collections::{btree_map, BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_bytes()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }
    };
}

name_type!(
    /// Key identifying a [`Table`] within a [`Namespace`].
    ///
    /// Names order lexicographically by their byte representation; that order
    /// is the canonical serialization order.
    TableName
);
name_type!(
    /// Key identifying a [`Row`] within a [`Table`].
    RowName
);
name_type!(
    /// Key identifying an [`Entry`] within a [`Row`].
    EntryName
);
name_type!(
    /// An opaque UTF-8 datum, the atomic value of the data model.
    Point
);

/// A mathematical set of [`Point`]s.
///
/// Duplicates collapse on insertion; join is set union.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entry {
    points: BTreeSet<Point>,
}

impl Entry {
    /// The empty entry, identity of [`Entry::join`].
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an entry from any collection of points, collapsing duplicates.
    pub fn make<I, P>(points: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Point>,
    {
        Entry {
            points: points.into_iter().map(Into::into).collect(),
        }
    }

    pub fn join(&self, other: &Entry) -> Entry {
        let mut points = self.points.clone();
        points.extend(other.points.iter().cloned());
        Entry { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn contains(&self, point: &Point) -> bool {
        self.points.contains(point)
    }

    /// Points in lexicographic order.
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}

/// A mapping from [`EntryName`] to [`Entry`].
///
/// Join is key-wise: entries present on both sides join, entries present on
/// one side are preserved.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    entries: BTreeMap<EntryName, Entry>,
}

impl Row {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a row from name/entry pairs. Pairs sharing a name join.
    pub fn make<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (EntryName, Entry)>,
    {
        let mut row = Row::empty();
        for (name, entry) in entries {
            row.insert(name, entry);
        }
        row
    }

    fn insert(&mut self, name: EntryName, entry: Entry) {
        match self.entries.entry(name) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            btree_map::Entry::Occupied(mut slot) => {
                let joined = slot.get().join(&entry);
                slot.insert(joined);
            }
        }
    }

    pub fn join(&self, other: &Row) -> Row {
        let mut joined = self.clone();
        for (name, entry) in &other.entries {
            joined.insert(name.clone(), entry.clone());
        }
        joined
    }

    /// A new row with `entry` joined in under `name`; the receiver is
    /// unchanged.
    pub fn join_entry(&self, name: EntryName, entry: Entry) -> Row {
        let mut joined = self.clone();
        joined.insert(name, entry);
        joined
    }

    pub fn entry(&self, name: &EntryName) -> Option<&Entry> {
        self.entries.get(name)
    }

    /// Entries in lexicographic name order.
    pub fn entries(&self) -> impl Iterator<Item = (&EntryName, &Entry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A mapping from [`RowName`] to [`Row`], joined key-wise.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table {
    rows: BTreeMap<RowName, Row>,
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from name/row pairs. Pairs sharing a name join.
    pub fn make<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (RowName, Row)>,
    {
        let mut table = Table::empty();
        for (name, row) in rows {
            table.insert(name, row);
        }
        table
    }

    fn insert(&mut self, name: RowName, row: Row) {
        match self.rows.entry(name) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(row);
            }
            btree_map::Entry::Occupied(mut slot) => {
                let joined = slot.get().join(&row);
                slot.insert(joined);
            }
        }
    }

    pub fn join(&self, other: &Table) -> Table {
        let mut joined = self.clone();
        for (name, row) in &other.rows {
            joined.insert(name.clone(), row.clone());
        }
        joined
    }

    /// A new table with `row` joined in under `name`; the receiver is
    /// unchanged.
    pub fn join_row(&self, name: RowName, row: Row) -> Table {
        let mut joined = self.clone();
        joined.insert(name, row);
        joined
    }

    pub fn row(&self, name: &RowName) -> Option<&Row> {
        self.rows.get(name)
    }

    /// Rows in lexicographic name order.
    ///
    /// Values are immutable, so the iterator is a stable snapshot: building a
    /// new joined table cannot affect it.
    pub fn rows(&self) -> impl Iterator<Item = (&RowName, &Row)> {
        self.rows.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// The top-level CRDT: a mapping from [`TableName`] to [`Table`].
///
/// The empty namespace is the identity element of [`Namespace::join`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace {
    tables: BTreeMap<TableName, Table>,
}

impl Namespace {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a namespace from name/table pairs. Pairs sharing a name join.
    pub fn make<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = (TableName, Table)>,
    {
        let mut ns = Namespace::empty();
        for (name, table) in tables {
            ns.insert(name, table);
        }
        ns
    }

    fn insert(&mut self, name: TableName, table: Table) {
        match self.tables.entry(name) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(table);
            }
            btree_map::Entry::Occupied(mut slot) => {
                let joined = slot.get().join(&table);
                slot.insert(joined);
            }
        }
    }

    pub fn join(&self, other: &Namespace) -> Namespace {
        let mut joined = self.clone();
        for (name, table) in &other.tables {
            joined.insert(name.clone(), table.clone());
        }
        joined
    }

    /// A new namespace with `table` joined in under `name`; the receiver is
    /// unchanged.
    pub fn join_table(&self, name: TableName, table: Table) -> Namespace {
        let mut joined = self.clone();
        joined.insert(name, table);
        joined
    }

    pub fn table(&self, name: &TableName) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Tables in lexicographic name order.
    pub fn tables(&self) -> impl Iterator<Item = (&TableName, &Table)> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}
