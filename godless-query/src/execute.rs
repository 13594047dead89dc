//! Query execution against a namespace snapshot.
//!
//! The executor is pure in the namespace: a join produces the delta
//! namespace for the caller to merge, a select returns a filtered
//! sub-namespace, and the input is never touched either way.

use std::collections::BTreeSet;

use godless_crdt::{Entry, Namespace, Row, RowName, Table};

use crate::error::Error;
use crate::{Predicate, PredicateArg, PredicateOp, Query, QueryOp, Where};

/// Result of executing a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The delta a join contributes; the caller joins it into its state.
    Join(Namespace),
    /// The rows a select matched, as a sub-namespace of the input.
    Select(Namespace),
}

impl Outcome {
    pub fn namespace(&self) -> &Namespace {
        match self {
            Outcome::Join(ns) | Outcome::Select(ns) => ns,
        }
    }
}

impl Query {
    /// Run the query against `ns`.
    ///
    /// Validation is assumed; call [`Query::validate`] on untrusted input
    /// first. Repeated execution against equal inputs yields equal results.
    pub fn execute(&self, ns: &Namespace) -> Result<Outcome, Error> {
        match &self.op {
            QueryOp::Join(join) => {
                let rows = join.rows.iter().map(|row| {
                    let entries = row.entries.iter().map(|(name, point)| {
                        (name.clone(), Entry::make([point.clone()]))
                    });
                    (row.key.clone(), Row::make(entries))
                });
                let delta = Namespace::make([(self.table.clone(), Table::make(rows))]);
                Ok(Outcome::Join(delta))
            }
            QueryOp::Select(select) => {
                // A table nobody joined into yet has no rows; an absent
                // table and an empty one select the same nothing.
                let Some(table) = ns.table(&self.table) else {
                    return Ok(Outcome::Select(Namespace::empty()));
                };

                let mut matched = Vec::new();
                for (key, row) in table.rows() {
                    let hit = match &select.filter {
                        Some(filter) => eval_where(filter, key, row),
                        None => true,
                    };
                    if hit {
                        matched.push((key.clone(), row.clone()));
                        if select.limit > 0 && matched.len() as u64 == select.limit {
                            break;
                        }
                    }
                }

                if matched.is_empty() {
                    return Ok(Outcome::Select(Namespace::empty()));
                }
                Ok(Outcome::Select(Namespace::make([(
                    self.table.clone(),
                    Table::make(matched),
                )])))
            }
        }
    }
}

fn eval_where(filter: &Where, key: &RowName, row: &Row) -> bool {
    match filter {
        Where::And(clauses) => clauses.iter().all(|clause| eval_where(clause, key, row)),
        Where::Or(clauses) => clauses.iter().any(|clause| eval_where(clause, key, row)),
        Where::Predicate(predicate) => eval_predicate(predicate, key, row),
    }
}

/// Existential predicate semantics: an entry argument stands for any one of
/// its points, and the predicate holds iff some choice of points makes it
/// hold. A missing entry makes the predicate false (closed world).
fn eval_predicate(predicate: &Predicate, key: &RowName, row: &Row) -> bool {
    let mut candidates: Vec<BTreeSet<&str>> = Vec::with_capacity(predicate.args.len());
    for arg in &predicate.args {
        let set = match arg {
            PredicateArg::Literal(point) => BTreeSet::from([point.as_str()]),
            PredicateArg::RowKey => BTreeSet::from([key.as_str()]),
            PredicateArg::Entry(name) => match row.entry(name) {
                Some(entry) if !entry.is_empty() => {
                    entry.points().map(|p| p.as_str()).collect()
                }
                _ => return false,
            },
        };
        candidates.push(set);
    }

    match predicate.op {
        // Some assignment makes all arguments equal iff the candidate sets
        // share a common value.
        PredicateOp::StrEq => {
            let mut common = candidates[0].clone();
            for set in &candidates[1..] {
                common = common.intersection(set).copied().collect();
                if common.is_empty() {
                    return false;
                }
            }
            true
        }
        // Some assignment makes a pair differ unless every set is the same
        // single value.
        PredicateOp::StrNeq => {
            let first = &candidates[0];
            !(first.len() == 1 && candidates[1..].iter().all(|set| set == first))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use godless_crdt::EntryName;

    fn run(src: &str, ns: &Namespace) -> Outcome {
        let query = Query::parse(src).expect("parse");
        query.validate().expect("validate");
        query.execute(ns).expect("execute")
    }

    fn apply(src: &str, ns: &Namespace) -> Namespace {
        match run(src, ns) {
            Outcome::Join(delta) => ns.join(&delta),
            Outcome::Select(_) => panic!("expected a join"),
        }
    }

    fn selected(src: &str, ns: &Namespace) -> Namespace {
        match run(src, ns) {
            Outcome::Select(result) => result,
            Outcome::Join(_) => panic!("expected a select"),
        }
    }

    #[test]
    fn join_then_select_finds_the_row() {
        let ns = apply(
            r#"join factory rows (@key=factory1, foreman="Foreman 1")"#,
            &Namespace::empty(),
        );
        let result = selected(
            r#"select factory where str_eq(foreman, "Foreman 1")"#,
            &ns,
        );

        let table = result.table(&"factory".into()).expect("table");
        assert_eq!(table.len(), 1);
        let row = table.row(&"factory1".into()).expect("row");
        let foreman = row.entry(&"foreman".into()).expect("entry");
        assert_eq!(foreman, &Entry::make(["Foreman 1"]));
    }

    #[test]
    fn execute_does_not_touch_the_input() {
        let ns = Namespace::empty();
        let query = Query::parse("join t rows (@key=a, x=1)").unwrap();
        let _ = query.execute(&ns).unwrap();
        assert!(ns.is_empty());

        // Pure: same query, same input, same outcome.
        assert_eq!(query.execute(&ns).unwrap(), query.execute(&ns).unwrap());
    }

    fn multi_point_row() -> Namespace {
        let a = apply("join t rows (@key=r, x=1)", &Namespace::empty());
        apply("join t rows (@key=r, x=2)", &a)
    }

    #[test]
    fn existential_matching_over_point_sets() {
        let ns = multi_point_row();
        // x = {"1","2"}
        assert!(!selected(r#"select t where str_eq(x, "1")"#, &ns).is_empty());
        assert!(!selected(r#"select t where str_neq(x, "1")"#, &ns).is_empty());
        assert!(selected(r#"select t where str_eq(x, "3")"#, &ns).is_empty());
    }

    #[test]
    fn missing_entries_fail_closed() {
        let ns = apply("join t rows (@key=r, x=1)", &Namespace::empty());
        assert!(selected(r#"select t where str_eq(nope, "1")"#, &ns).is_empty());
        assert!(selected(r#"select t where str_neq(nope, "1")"#, &ns).is_empty());
    }

    #[test]
    fn row_key_shorthand_matches_the_key() {
        let ns = apply("join t rows (@key=r1, x=1), (@key=r2, x=1)", &Namespace::empty());
        let result = selected(r#"select t where str_eq(@key, "r1")"#, &ns);
        let table = result.table(&"t".into()).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.row(&"r1".into()).is_some());
    }

    #[test]
    fn connectives_combine_predicates() {
        let ns = apply(
            "join t rows (@key=a, x=1, y=1), (@key=b, x=1, y=2), (@key=c, x=2, y=2)",
            &Namespace::empty(),
        );

        let both = selected(r#"select t where and(str_eq(x, "1"), str_eq(y, "2"))"#, &ns);
        assert_eq!(both.table(&"t".into()).unwrap().len(), 1);

        let either = selected(r#"select t where or(str_eq(x, "2"), str_eq(y, "1"))"#, &ns);
        assert_eq!(either.table(&"t".into()).unwrap().len(), 2);
    }

    #[test]
    fn results_come_in_row_key_order_and_respect_limit() {
        let ns = apply(
            "join t rows (@key=c, x=1), (@key=a, x=1), (@key=b, x=1)",
            &Namespace::empty(),
        );

        let all = selected("select t", &ns);
        let keys: Vec<_> = all
            .table(&"t".into())
            .unwrap()
            .rows()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec!["a".into(), "b".into(), "c".into()]);

        let capped = selected("select t limit 2", &ns);
        let keys: Vec<_> = capped
            .table(&"t".into())
            .unwrap()
            .rows()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec!["a".into(), "b".into()]);
    }

    #[test]
    fn select_on_an_absent_table_is_empty() {
        let result = selected("select nothing", &Namespace::empty());
        assert!(result.is_empty());
    }

    #[test]
    fn join_delta_builds_the_expected_shape() {
        let Outcome::Join(delta) = run(
            "join books rows (@key=b1, title=dune, author=herbert)",
            &Namespace::empty(),
        ) else {
            panic!("expected a join")
        };

        let row = delta
            .table(&"books".into())
            .and_then(|t| t.row(&"b1".into()))
            .expect("row");
        let names: Vec<&EntryName> = row.entries().map(|(name, _)| name).collect();
        assert_eq!(names.len(), 2);
        assert_eq!(row.entry(&"title".into()), Some(&Entry::make(["dune"])));
    }
}
