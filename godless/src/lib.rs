//! Godless is a peer-to-peer database running over a content-addressed
//! store.
//!
//! It shares schemaless structured data between peers using a grow-only CRDT
//! namespace. This crate assembles the pieces — the CRDT model from
//! [`godless_crdt`], chunked persistence from [`godless_store`] and the query
//! language from [`godless_query`] — into a node with an admission-controlled
//! API, an HTTP front end and a pub/sub replicator.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod http;
pub mod node;
pub mod replicator;
pub mod scheduler;

pub use api::{ApiError, Payload, ReflectionType, Request, Response};
pub use client::Client;
pub use config::Config;
pub use node::{Node, Options};
pub use scheduler::ApiHandle;
