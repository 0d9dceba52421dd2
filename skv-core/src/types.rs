//! Shared aliases used across the keyspace, snapshot, and dispatcher modules.

use ahash::RandomState;

/// Hash map keyed by owned byte strings, using the same hasher everywhere so
/// distribution stays consistent across the store's internal tables.
pub(crate) type AMap<V> = hashbrown::HashMap<Vec<u8>, V, RandomState>;

/// Hash set of owned byte strings (set members, subscriber sets).
pub(crate) type ASet<T> = hashbrown::HashSet<T, RandomState>;

/// Opaque connection identifier minted by the host; the core only ever uses
/// it as a set element, never dereferencing it.
pub type ConnId = u64;

/// `TTL`/`PTTL` sentinel: key does not exist.
pub const TTL_MISSING: i64 = -2;
/// `TTL`/`PTTL` sentinel: key exists but has no expiry.
pub const TTL_NO_EXPIRY: i64 = -1;
