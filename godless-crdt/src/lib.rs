//! The godless data model.
//!
//! State shared between peers is a [`Namespace`]: a grow-only CRDT resembling
//! a relational schema, with tables, rows, entries and string points. Values
//! at every level form a join-semilattice, so updates merge in any order with
//! the same result.
//!
//! The [`codec`] module provides the canonical byte encoding used to derive
//! content addresses: semantically equal values encode to identical bytes.

pub mod codec;
pub mod index;
pub mod keys;
pub mod link;
pub mod namespace;
pub mod stream;

pub use index::Index;
pub use keys::{Identity, IdentityId, KeyError};
pub use link::{Link, SignatureBytes};
pub use namespace::{Entry, EntryName, Namespace, Point, Row, RowName, Table, TableName};
pub use stream::StreamEntry;
