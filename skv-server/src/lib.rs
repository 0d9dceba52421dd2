//! The host binary's library half: the `tokio` event loop, the actor that
//! owns the one live `skv_core::KeyspaceStore`, and ambient request metrics.
//!
//! `skv-core` is deliberately I/O-free (see its own crate docs); everything
//! here is the minimal "external event loop" the core's design notes
//! describe as out of scope for the storage engine itself.

pub mod metrics;
pub mod server;

pub use metrics::Metrics;
pub use server::{accept_loop, spawn_actor, spawn_sweeper, ActorHandle};
