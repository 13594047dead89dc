//! Static validation of compiled queries.
//!
//! The parser cannot produce most of these shapes, but queries also arrive
//! binary-decoded from the wire, so every rule is checked again here.

use crate::error::Error;
use crate::{Predicate, PredicateArg, Query, QueryOp, Where};

impl Query {
    pub fn validate(&self) -> Result<(), Error> {
        if self.table.is_empty() {
            return Err(Error::Validation("query names no table".to_string()));
        }
        match &self.op {
            QueryOp::Join(join) => {
                if join.rows.is_empty() {
                    return Err(Error::Validation("join has no rows".to_string()));
                }
                for row in &join.rows {
                    if row.key.is_empty() {
                        return Err(Error::Validation("join row has an empty key".to_string()));
                    }
                }
                Ok(())
            }
            QueryOp::Select(select) => match &select.filter {
                Some(filter) => validate_where(filter),
                None => Ok(()),
            },
        }
    }
}

fn validate_where(filter: &Where) -> Result<(), Error> {
    match filter {
        Where::And(clauses) | Where::Or(clauses) => {
            if clauses.is_empty() {
                return Err(Error::Validation("empty connective".to_string()));
            }
            clauses.iter().try_for_each(validate_where)
        }
        Where::Predicate(predicate) => validate_predicate(predicate),
    }
}

fn validate_predicate(predicate: &Predicate) -> Result<(), Error> {
    if predicate.args.len() < 2 {
        return Err(Error::Validation(format!(
            "{} takes at least 2 arguments, got {}",
            predicate.op.name(),
            predicate.args.len()
        )));
    }
    for arg in &predicate.args {
        if let PredicateArg::Entry(name) = arg {
            if name.is_empty() {
                return Err(Error::Validation(
                    "predicate references an empty entry name".to_string(),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JoinSpec, PredicateOp, RowJoin, SelectSpec};

    fn select_with(filter: Where) -> Query {
        Query {
            table: "t".into(),
            op: QueryOp::Select(SelectSpec {
                filter: Some(filter),
                limit: 0,
            }),
        }
    }

    #[test]
    fn parsed_queries_validate() {
        Query::parse(r#"join factory rows (@key=factory1, foreman="Foreman 1")"#)
            .unwrap()
            .validate()
            .unwrap();
        Query::parse(r#"select factory where str_eq(foreman, "Foreman 1") limit 3"#)
            .unwrap()
            .validate()
            .unwrap();
    }

    #[test]
    fn join_needs_rows() {
        let query = Query {
            table: "t".into(),
            op: QueryOp::Join(JoinSpec { rows: vec![] }),
        };
        assert!(matches!(query.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn join_rows_need_keys() {
        let query = Query {
            table: "t".into(),
            op: QueryOp::Join(JoinSpec {
                rows: vec![RowJoin {
                    key: "".into(),
                    entries: Default::default(),
                }],
            }),
        };
        assert!(matches!(query.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn predicates_need_two_arguments() {
        let query = select_with(Where::Predicate(Predicate {
            op: PredicateOp::StrEq,
            args: vec![PredicateArg::RowKey],
        }));
        assert!(matches!(query.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn connectives_cannot_be_empty() {
        let query = select_with(Where::And(vec![]));
        assert!(matches!(query.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn query_needs_a_table() {
        let query = Query {
            table: "".into(),
            op: QueryOp::Select(SelectSpec {
                filter: None,
                limit: 0,
            }),
        };
        assert!(matches!(query.validate(), Err(Error::Validation(_))));
    }
}
