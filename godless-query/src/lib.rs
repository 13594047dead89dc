//! The godless query language.
//!
//! Two operations exist: `join`, which adds rows to a table, and `select`,
//! which filters a table's rows through a predicate tree. There is no
//! deletion and no negation; queries are monotone, matching the grow-only
//! data model underneath.
//!
//! ```text
//! join factory rows (@key=factory1, foreman="Foreman 1")
//! select factory where str_eq(foreman, "Foreman 1") limit 10
//! ```
//!
//! [`Query::parse`] compiles source text, [`Query::validate`] checks static
//! rules, [`Query::analyse`] describes the query without running it, and
//! [`Query::execute`] runs it against a namespace snapshot. Execution is
//! pure: it never performs I/O and never mutates its input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use godless_crdt::{EntryName, Point, RowName, TableName};

pub mod analyse;
pub mod error;
pub mod execute;
pub mod parse;
pub mod validate;

pub use analyse::AnalysisReport;
pub use error::{Error, ParseError};
pub use execute::Outcome;

/// A compiled query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub table: TableName,
    pub op: QueryOp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    Join(JoinSpec),
    Select(SelectSpec),
}

/// Rows to be joined into the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub rows: Vec<RowJoin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowJoin {
    pub key: RowName,
    pub entries: BTreeMap<EntryName, Point>,
}

/// A filtered read of the target table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectSpec {
    pub filter: Option<Where>,
    /// 0 means unlimited.
    pub limit: u64,
}

/// Predicate tree. Connectives are n-ary; there is no `not`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Where {
    And(Vec<Where>),
    Or(Vec<Where>),
    Predicate(Predicate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub op: PredicateOp,
    pub args: Vec<PredicateArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateOp {
    StrEq,
    StrNeq,
}

impl PredicateOp {
    pub fn name(&self) -> &'static str {
        match self {
            PredicateOp::StrEq => "str_eq",
            PredicateOp::StrNeq => "str_neq",
        }
    }
}

/// One predicate argument, resolved per candidate row at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredicateArg {
    /// A quoted literal.
    Literal(Point),
    /// The value of the named entry in the candidate row.
    Entry(EntryName),
    /// The candidate row's key (`@key`).
    RowKey,
}

impl Query {
    pub fn is_mutating(&self) -> bool {
        matches!(self.op, QueryOp::Join(_))
    }
}
