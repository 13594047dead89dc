//! Content-addressed persistence for the godless namespace.
//!
//! A namespace is split into bounded-size chunks, each written as an
//! immutable blob to a content-addressed store (the COS), and described by an
//! [`Index`] manifest whose signed head link is the only mutable state in the
//! system. Reading reverses the process: traverse the chunk DAG breadth-first
//! and fold the parts back together under the namespace join.
//!
//! [`Index`]: godless_crdt::Index

pub mod chunk;
pub mod content;
pub mod error;
pub mod head;
pub mod keystore;
pub mod resolver;

pub use chunk::{ChunkRecord, DEFAULT_CHUNK_SIZE_LIMIT};
pub use content::{ContentStore, MemStore};
pub use error::Error;
pub use head::{HeadCache, ResidentHeadCache};
pub use keystore::KeyStore;
pub use resolver::Resolver;
