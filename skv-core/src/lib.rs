//! The storage core: a typed in-memory keyspace, its binary snapshot
//! format, and the inline-protocol command dispatcher built on top of it.
//!
//! This crate owns no sockets and runs no event loop — it is a plain value
//! plus pure functions over it, driven synchronously by a host (`skv-server`
//! in this workspace).

pub mod dispatcher;
pub mod keyspace;
mod lru;
mod snapshot;
mod types;
mod value;

pub use dispatcher::{Dispatcher, Publish, Response};
pub use keyspace::KeyspaceStore;
pub use types::{ConnId, TTL_MISSING, TTL_NO_EXPIRY};
pub use value::Value;
