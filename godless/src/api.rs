//! Request and response types of the godless API.

use std::fmt;

use serde::{Deserialize, Serialize};

use godless_crdt::{Index, Link, Namespace};
use godless_query::Query;

/// A client-visible request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Run a compiled query.
    Query(Query),
    /// Inspect node state without changing it.
    Reflect(ReflectionType),
    /// Merge remote heads into the local namespace.
    Replicate(Vec<Link>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReflectionType {
    /// The current index manifest.
    Index,
    /// The current head link.
    HeadPath,
    /// The fully materialized namespace.
    DumpNamespace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub msg: String,
    pub payload: Payload,
}

impl Response {
    pub fn ok(msg: impl Into<String>) -> Self {
        Response {
            msg: msg.into(),
            payload: Payload::None,
        }
    }

    pub fn with_payload(msg: impl Into<String>, payload: Payload) -> Self {
        Response {
            msg: msg.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    None,
    Namespace(Namespace),
    Index(Index),
    Path(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.msg)?;
        match &self.payload {
            Payload::None => Ok(()),
            Payload::Path(path) => writeln!(f, "{path}"),
            Payload::Index(index) => {
                for (table, links) in index.tables() {
                    let cids: Vec<_> = links.iter().map(|l| l.to_string()).collect();
                    writeln!(f, "{table}: {}", cids.join(" "))?;
                }
                Ok(())
            }
            Payload::Namespace(ns) => {
                for tuple in ns.stream() {
                    writeln!(
                        f,
                        "{}/{}/{} = {:?}",
                        tuple.table,
                        tuple.row,
                        tuple.entry,
                        tuple.point.as_str()
                    )?;
                }
                Ok(())
            }
        }
    }
}

/// Error kinds surfaced to API clients.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid query: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("content store unavailable: {0}")]
    CosUnavailable(String),

    #[error("corrupt chunk: {0}")]
    CorruptChunk(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("too much write contention")]
    Conflict,

    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<godless_query::Error> for ApiError {
    fn from(err: godless_query::Error) -> Self {
        match err {
            godless_query::Error::Parse(parse) => ApiError::Parse(parse.to_string()),
            godless_query::Error::Validation(msg) => ApiError::Validation(msg),
        }
    }
}

impl From<godless_query::ParseError> for ApiError {
    fn from(err: godless_query::ParseError) -> Self {
        ApiError::Parse(err.to_string())
    }
}

impl From<godless_store::Error> for ApiError {
    fn from(err: godless_store::Error) -> Self {
        use godless_store::Error;
        match &err {
            Error::CosUnavailable(_) => ApiError::CosUnavailable(err.to_string()),
            Error::CorruptChunk { .. } | Error::Codec(_) => ApiError::CorruptChunk(err.to_string()),
            Error::SignatureInvalid(_) => ApiError::SignatureInvalid(err.to_string()),
            Error::NotFound(cid) => ApiError::NotFound(cid.to_string()),
        }
    }
}
