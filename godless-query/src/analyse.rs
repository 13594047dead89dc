//! Static description of a query, for `--analyse` and dry runs.

use std::collections::BTreeSet;
use std::fmt;

use godless_crdt::{EntryName, RowName, TableName};

use crate::{PredicateArg, Query, QueryOp, Where};

/// What a query touches, computed without executing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub table: TableName,
    pub mutating: bool,
    /// Row keys a join writes. Empty for selects.
    pub row_keys: Vec<RowName>,
    /// Entry names written by a join or referenced by select predicates.
    pub entries: BTreeSet<EntryName>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn analyse(&self) -> AnalysisReport {
        match &self.op {
            QueryOp::Join(join) => AnalysisReport {
                table: self.table.clone(),
                mutating: true,
                row_keys: join.rows.iter().map(|row| row.key.clone()).collect(),
                entries: join
                    .rows
                    .iter()
                    .flat_map(|row| row.entries.keys().cloned())
                    .collect(),
                limit: None,
            },
            QueryOp::Select(select) => {
                let mut entries = BTreeSet::new();
                if let Some(filter) = &select.filter {
                    collect_entries(filter, &mut entries);
                }
                AnalysisReport {
                    table: self.table.clone(),
                    mutating: false,
                    row_keys: Vec::new(),
                    entries,
                    limit: (select.limit > 0).then_some(select.limit),
                }
            }
        }
    }
}

fn collect_entries(filter: &Where, entries: &mut BTreeSet<EntryName>) {
    match filter {
        Where::And(clauses) | Where::Or(clauses) => {
            for clause in clauses {
                collect_entries(clause, entries);
            }
        }
        Where::Predicate(predicate) => {
            for arg in &predicate.args {
                if let PredicateArg::Entry(name) = arg {
                    entries.insert(name.clone());
                }
            }
        }
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.mutating { "join" } else { "select" };
        writeln!(f, "operation: {kind}")?;
        writeln!(f, "table: {}", self.table)?;
        if !self.row_keys.is_empty() {
            let keys: Vec<_> = self.row_keys.iter().map(|k| k.as_str()).collect();
            writeln!(f, "row keys: {}", keys.join(", "))?;
        }
        if !self.entries.is_empty() {
            let names: Vec<_> = self.entries.iter().map(|e| e.as_str()).collect();
            writeln!(f, "entries: {}", names.join(", "))?;
        }
        if let Some(limit) = self.limit {
            writeln!(f, "limit: {limit}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_analysis() {
        let report = Query::parse("join factory rows (@key=f1, foreman=alice), (@key=f2)")
            .unwrap()
            .analyse();
        assert!(report.mutating);
        assert_eq!(report.table, "factory".into());
        assert_eq!(report.row_keys, vec!["f1".into(), "f2".into()]);
        assert!(report.entries.contains(&"foreman".into()));
        assert_eq!(report.limit, None);
    }

    #[test]
    fn select_analysis_collects_referenced_entries() {
        let report =
            Query::parse(r#"select t where and(str_eq(a, "1"), str_neq(b, @key)) limit 5"#)
                .unwrap()
                .analyse();
        assert!(!report.mutating);
        assert_eq!(report.limit, Some(5));
        assert_eq!(
            report.entries,
            BTreeSet::from(["a".into(), "b".into()])
        );
        let rendered = report.to_string();
        assert!(rendered.contains("operation: select"), "{rendered}");
        assert!(rendered.contains("limit: 5"), "{rendered}");
    }
}
