//! Tuple-stream representation of a namespace.
//!
//! A namespace flattens to a stream of (table, row, entry, point) tuples in
//! lexicographic order, and folds back from any tuple sequence by idempotent
//! insertion. The two directions are inverses up to canonicalization, which
//! lets large namespaces move through bounded-memory pipelines.

use serde::{Deserialize, Serialize};

use crate::namespace::{Entry, EntryName, Namespace, Point, Row, RowName, Table, TableName};

/// One flattened datum of a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamEntry {
    pub table: TableName,
    pub row: RowName,
    pub entry: EntryName,
    pub point: Point,
}

impl Namespace {
    /// Stream the namespace as tuples, ordered by table, row, entry and point.
    ///
    /// The order is deterministic for semantically equal namespaces, so the
    /// stream can be replayed or compared across peers.
    pub fn stream(&self) -> impl Iterator<Item = StreamEntry> + '_ {
        self.tables().flat_map(|(table_name, table)| {
            table.rows().flat_map(move |(row_name, row)| {
                row.entries().flat_map(move |(entry_name, entry)| {
                    entry.points().map(move |point| StreamEntry {
                        table: table_name.clone(),
                        row: row_name.clone(),
                        entry: entry_name.clone(),
                        point: point.clone(),
                    })
                })
            })
        })
    }

    /// Fold a tuple stream back into a namespace.
    ///
    /// Insertion is a join, so duplicated tuples and arbitrary input order
    /// produce the same value.
    pub fn from_stream<I>(stream: I) -> Namespace
    where
        I: IntoIterator<Item = StreamEntry>,
    {
        let mut ns = Namespace::empty();
        for tuple in stream {
            let row = Row::make([(tuple.entry, Entry::make([tuple.point]))]);
            let table = Table::make([(tuple.row, row)]);
            ns = ns.join_table(tuple.table, table);
        }
        ns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Namespace {
        Namespace::make([
            (
                "b".into(),
                Table::make([(
                    "r2".into(),
                    Row::make([("e".into(), Entry::make(["p2", "p1"]))]),
                )]),
            ),
            (
                "a".into(),
                Table::make([(
                    "r1".into(),
                    Row::make([("e".into(), Entry::make(["z"]))]),
                )]),
            ),
        ])
    }

    #[test]
    fn stream_order_is_lexicographic() {
        let tuples: Vec<_> = sample().stream().collect();
        let mut sorted = tuples.clone();
        sorted.sort();
        assert_eq!(tuples, sorted);
        assert_eq!(tuples[0].table, "a".into());
        assert_eq!(tuples.last().unwrap().point, "p2".into());
    }

    #[test]
    fn stream_roundtrip() {
        let ns = sample();
        assert_eq!(Namespace::from_stream(ns.stream()), ns);
    }

    #[test]
    fn fold_ignores_duplicates_and_order() {
        let ns = sample();
        let mut tuples: Vec<_> = ns.stream().collect();
        tuples.extend(ns.stream());
        tuples.reverse();
        assert_eq!(Namespace::from_stream(tuples), ns);
    }
}
