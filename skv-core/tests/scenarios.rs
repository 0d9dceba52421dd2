//! Integration tests driving the dispatcher end to end against the literal
//! command transcripts from the workspace's concrete scenario list —
//! complementing the unit tests colocated with `keyspace.rs`/`dispatcher.rs`,
//! which exercise the same invariants one call at a time.

use std::time::Duration;

use skv_common::{Config, EvictionPolicy};
use skv_core::{Dispatcher, KeyspaceStore};

fn line(d: &mut Dispatcher, s: &mut KeyspaceStore, text: &str) -> String {
    let (response, _) = d.handle_line(s, text.as_bytes()).expect("non-empty line");
    String::from_utf8(response.into_bytes()).expect("utf8 response")
}

#[test]
fn lru_eviction_scenario_matches_literal_transcript() {
    let mut cfg = Config::default();
    // Each `SET <1-char key> 0123456789` costs key.len() + value.len() = 11
    // bytes; a cap of 22 fits exactly two entries, so the third forces an
    // eviction (matching the unit test at keyspace.rs's `lru_eviction_order`).
    cfg.max_memory_bytes = 22;
    cfg.eviction_policy = EvictionPolicy::AllKeysLru;
    let mut store = KeyspaceStore::new(&cfg);
    let mut d = Dispatcher::new(1);

    assert_eq!(line(&mut d, &mut store, "SET a 0123456789"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "SET b 0123456789"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "GET a"), "0123456789\n");
    assert_eq!(line(&mut d, &mut store, "SET c 0123456789"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "EXISTS a"), "1\n");
    assert_eq!(line(&mut d, &mut store, "EXISTS b"), "0\n");
    assert_eq!(line(&mut d, &mut store, "EXISTS c"), "1\n");
}

#[test]
fn ttl_expiration_via_sweep_matches_literal_transcript() {
    let mut store = KeyspaceStore::new(&Config::default());
    let mut d = Dispatcher::new(1);

    assert_eq!(line(&mut d, &mut store, "SET t v"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "PEXPIRE t 1"), "1\n");

    std::thread::sleep(Duration::from_millis(10));
    store.sweep_expired();

    assert_eq!(line(&mut d, &mut store, "EXISTS t"), "0\n");
    assert_eq!(line(&mut d, &mut store, "TTL t"), "-2\n");
}

#[test]
fn out_of_memory_rejects_write_and_leaves_counter_unchanged() {
    let mut cfg = Config::default();
    cfg.max_memory_bytes = 10;
    cfg.eviction_policy = EvictionPolicy::None;
    let mut store = KeyspaceStore::new(&cfg);
    let mut d = Dispatcher::new(1);

    assert_eq!(line(&mut d, &mut store, "SET a 12345"), "ok\n");
    let used_before = store.memory_used();
    let resp = line(&mut d, &mut store, "SET b 123456");
    assert!(resp.starts_with("error: OOM"));
    assert_eq!(store.memory_used(), used_before);
}

#[test]
fn snapshot_round_trip_through_dispatcher_flush_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dump.skv");

    let mut cfg = Config::default();
    cfg.snapshot_path = Some(path.clone());
    let mut store = KeyspaceStore::new(&cfg);
    let mut d = Dispatcher::new(1);

    assert_eq!(line(&mut d, &mut store, "SET k v"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "RPUSH l a"), "1\n");
    assert_eq!(line(&mut d, &mut store, "FLUSH SAVE"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "EXISTS k"), "0\n");

    assert_eq!(line(&mut d, &mut store, "LOAD"), "ok\n");
    assert_eq!(line(&mut d, &mut store, "GET k"), "v\n");
    assert_eq!(line(&mut d, &mut store, "LRANGE l 0 -1"), "a\nend\n");
}
