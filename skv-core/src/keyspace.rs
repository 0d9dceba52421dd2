//! The typed in-memory database: strings, lists, sets, hashes, TTL,
//! memory-bounded eviction, and the pub/sub registry.
//!
//! Owned by exactly one caller (the host's single event-loop actor — see
//! the workspace concurrency notes). No locks appear anywhere in this
//! module; none are needed.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use skv_common::{Config, EvictionPolicy, SkvError, SkvResult};

use crate::lru::Lru;
use crate::snapshot;
use crate::types::{AMap, ASet, ConnId, TTL_MISSING, TTL_NO_EXPIRY};
use crate::value::Value;

/// The typed keyspace database described by the workspace's data model.
pub struct KeyspaceStore {
    data: AMap<Value>,
    expiry: AMap<Instant>,
    channels: AMap<ASet<ConnId>>,
    lru: Lru,
    max_memory_bytes: u64,
    used_bytes: u64,
    eviction_policy: EvictionPolicy,
    snapshot_path: Option<PathBuf>,
}

impl KeyspaceStore {
    /// Builds an empty store from a resolved configuration. Pre-reserves a
    /// modest default bucket capacity (matching the original store's own
    /// `reserve(1024)` at construction) since most hosts open a store and
    /// immediately start filling it.
    pub fn new(config: &Config) -> Self {
        Self::with_capacity(config, 1024)
    }

    /// Builds an empty store, pre-reserving hash-bucket capacity for
    /// `entry_hint` entries to avoid rehashing during a bulk load.
    pub fn with_capacity(config: &Config, entry_hint: usize) -> Self {
        KeyspaceStore {
            data: AMap::with_capacity_and_hasher(entry_hint, Default::default()),
            expiry: AMap::default(),
            channels: AMap::default(),
            lru: Lru::new(),
            max_memory_bytes: config.max_memory_bytes,
            used_bytes: 0,
            eviction_policy: config.eviction_policy,
            snapshot_path: config.snapshot_path.clone(),
        }
    }

    /// Builds a fresh store from a snapshot file, per the "atomic swap-in"
    /// policy: the caller only replaces its live store with this one after
    /// the load fully succeeds.
    pub fn load_from_snapshot(path: &Path, config: &Config) -> SkvResult<Self> {
        let loaded = snapshot::load(path)?;
        let mut store = Self::with_capacity(config, loaded.entries.len());
        for (key, value) in loaded.entries {
            let bytes = key.len() as u64 + value.payload_bytes();
            store.used_bytes += bytes;
            // Register each loaded key in the LRU so a cap configured at
            // load time has a real recency list to evict from, rather than
            // treating every loaded key as untracked until its next touch.
            store.touch(&key);
            store.data.insert(key, value);
        }
        for (key, deadline) in loaded.expiry {
            store.expiry.insert(key, deadline);
        }
        Ok(store)
    }

    /// Saves the current keyspace to `path`, or to the configured snapshot
    /// path if `path` is `None`.
    pub fn save(&self, path: Option<&Path>) -> SkvResult<()> {
        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.snapshot_path.clone())
            .ok_or_else(|| SkvError::save_failed(PathBuf::new(), "no snapshot path configured"))?;
        snapshot::save(&self.data, &self.expiry, &target)
    }

    /// The configured snapshot path, if any.
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// `LOAD`: rebuilds a fresh store from the configured snapshot path and
    /// only then replaces `self`. The open question in the workspace design
    /// notes ("should `LOAD` be atomic w.r.t. a mid-command store") is
    /// resolved this way: parsing happens entirely off to the side, so a
    /// failed load leaves the live keyspace completely untouched.
    pub fn reload_from_snapshot(&mut self) -> SkvResult<()> {
        let path = self
            .snapshot_path
            .clone()
            .ok_or_else(|| SkvError::load_failed(PathBuf::new(), "no snapshot path configured"))?;
        let config = Config {
            max_memory_bytes: self.max_memory_bytes,
            eviction_policy: self.eviction_policy,
            snapshot_path: Some(path.clone()),
            ..Config::default()
        };
        let fresh = Self::load_from_snapshot(&path, &config)?;
        *self = fresh;
        Ok(())
    }

    // ---- memory accounting ----

    fn track_add(&mut self, n: u64) {
        self.used_bytes = self.used_bytes.saturating_add(n);
    }

    fn track_sub(&mut self, n: u64) {
        self.used_bytes = self.used_bytes.saturating_sub(n);
    }

    /// Current tracked memory usage, in bytes.
    pub fn memory_used(&self) -> u64 {
        self.used_bytes
    }

    fn touch(&mut self, key: &[u8]) {
        if self.max_memory_bytes > 0 {
            self.lru.touch(key);
        }
    }

    /// Evicts entries until admitting `additional` bytes would not exceed
    /// the cap, or fails with `OutOfMemory` if the cap is enabled but
    /// eviction cannot free enough space.
    ///
    /// `growing` names a key already present in the store that the current
    /// write is growing in place (e.g. `APPEND`, `LPUSH` on an existing
    /// list). Eviction must never pick it: it is the key whose own write is
    /// waiting on the space this call frees, so evicting it would leave the
    /// caller mutating a key it just deleted. `None` for writes that create
    /// a brand new key, which can't yet be its own eviction victim.
    fn admit(&mut self, additional: u64, growing: Option<&[u8]>) -> SkvResult<()> {
        if self.max_memory_bytes == 0 {
            return Ok(());
        }
        while self.used_bytes + additional > self.max_memory_bytes {
            let victim = match self.eviction_policy {
                EvictionPolicy::None => None,
                EvictionPolicy::AllKeysLru => self.lru.pop_front(growing),
                EvictionPolicy::AllKeysRandom => self.lru.pop_random(growing),
            };
            match victim {
                Some(key) => {
                    tracing::debug!(key = %String::from_utf8_lossy(&key), "evicting key");
                    self.remove_key(&key);
                }
                None => return Err(SkvError::OutOfMemory),
            }
        }
        Ok(())
    }

    /// The single deletion routine used by lazy expiry, the sweep, `DEL`,
    /// and eviction — keeps the type map, expiry map, LRU list, and memory
    /// counter consistent no matter which caller triggers the removal.
    fn remove_key(&mut self, key: &[u8]) -> bool {
        self.expiry.remove(key);
        self.lru.remove(key);
        match self.data.remove(key) {
            Some(value) => {
                self.track_sub(key.len() as u64 + value.payload_bytes());
                true
            }
            None => false,
        }
    }

    /// Consults the expiry index for `key`; if its deadline has passed,
    /// deletes it via `remove_key` and returns `true` (treat as absent for
    /// the caller's current operation).
    fn expire_if_due(&mut self, key: &[u8]) -> bool {
        if self.expiry.is_empty() {
            return false;
        }
        match self.expiry.get(key) {
            Some(&deadline) if Instant::now() >= deadline => {
                self.remove_key(key);
                true
            }
            _ => false,
        }
    }

    /// Proactively removes every key whose deadline has passed. Fire and
    /// forget: the dispatcher does not need the list for anything but
    /// logging.
    pub fn sweep_expired(&mut self) -> Vec<Vec<u8>> {
        if self.expiry.is_empty() {
            return Vec::new();
        }
        let now = Instant::now();
        let expired: Vec<Vec<u8>> = self
            .expiry
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove_key(key);
        }
        expired
    }

    // ---- strings ----

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) -> SkvResult<()> {
        self.expire_if_due(&key);
        if let Some(Value::Str(existing)) = self.data.get_mut(&key) {
            let old_len = existing.len() as u64;
            *existing = value;
            let new_len = existing.len() as u64;
            self.track_sub(old_len);
            self.track_add(new_len);
            self.touch(&key);
            return Ok(());
        }
        if self.data.contains_key(&key) {
            return Err(SkvError::TypeConflict);
        }
        let additional = key.len() as u64 + value.len() as u64;
        self.admit(additional, None)?;
        self.track_add(additional);
        self.touch(&key);
        self.data.insert(key, Value::Str(value));
        Ok(())
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        if self.expire_if_due(key) {
            return None;
        }
        let value = match self.data.get(key) {
            Some(Value::Str(v)) => Some(v.clone()),
            _ => None,
        };
        if value.is_some() {
            self.touch(key);
        }
        value
    }

    /// Shared body for `INCR`/`DECR`/`INCRBY`/`DECRBY`: parses the current
    /// value (or treats an absent key as zero), adds `delta`, writes the
    /// result back as decimal text. TTL, if any, is left untouched.
    pub fn incr_by(&mut self, key: &[u8], delta: i64) -> SkvResult<i64> {
        self.expire_if_due(key);
        let current: i64 = match self.data.get(key) {
            Some(Value::Str(s)) => std::str::from_utf8(s)
                .ok()
                .and_then(|text| text.parse().ok())
                .ok_or(SkvError::NotAnInteger)?,
            Some(_) => return Err(SkvError::TypeConflict),
            None => 0,
        };
        let updated = current.checked_add(delta).ok_or(SkvError::NotAnInteger)?;
        let text = updated.to_string().into_bytes();

        if let Some(Value::Str(existing)) = self.data.get_mut(key) {
            let old_len = existing.len() as u64;
            *existing = text;
            let new_len = existing.len() as u64;
            self.track_sub(old_len);
            self.track_add(new_len);
        } else {
            let additional = key.len() as u64 + text.len() as u64;
            self.admit(additional, None)?;
            self.track_add(additional);
            self.data.insert(key.to_vec(), Value::Str(text));
        }
        self.touch(key);
        Ok(updated)
    }

    pub fn append(&mut self, key: &[u8], suffix: &[u8]) -> SkvResult<usize> {
        self.expire_if_due(key);
        let exists_as_str = match self.data.get(key) {
            Some(Value::Str(_)) => true,
            Some(_) => return Err(SkvError::TypeConflict),
            None => false,
        };

        if exists_as_str {
            // `growing: Some(key)` — a key already in the store must never
            // be its own eviction victim while admitting the bytes its own
            // write needs.
            self.admit(suffix.len() as u64, Some(key))?;
            let new_len = match self.data.get_mut(key) {
                Some(Value::Str(existing)) => {
                    existing.extend_from_slice(suffix);
                    existing.len()
                }
                _ => unreachable!("checked above"),
            };
            self.track_add(suffix.len() as u64);
            self.touch(key);
            Ok(new_len)
        } else {
            let additional = key.len() as u64 + suffix.len() as u64;
            self.admit(additional, None)?;
            self.track_add(additional);
            self.data.insert(key.to_vec(), Value::Str(suffix.to_vec()));
            self.touch(key);
            Ok(suffix.len())
        }
    }

    pub fn strlen(&mut self, key: &[u8]) -> usize {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::Str(s)) => s.len(),
            _ => 0,
        }
    }

    pub fn getset(&mut self, key: &[u8], value: Vec<u8>) -> SkvResult<Vec<u8>> {
        self.expire_if_due(key);
        let old = match self.data.get(key) {
            Some(Value::Str(s)) => s.clone(),
            Some(_) => return Err(SkvError::TypeConflict),
            None => Vec::new(),
        };
        self.set(key.to_vec(), value)?;
        Ok(old)
    }

    pub fn setnx(&mut self, key: &[u8], value: Vec<u8>) -> SkvResult<bool> {
        self.expire_if_due(key);
        if self.data.contains_key(key) {
            return Ok(false);
        }
        self.set(key.to_vec(), value)?;
        Ok(true)
    }

    pub fn setex(&mut self, key: &[u8], ttl: Duration, value: Vec<u8>) -> SkvResult<()> {
        self.set(key.to_vec(), value)?;
        self.expiry.insert(key.to_vec(), Instant::now() + ttl);
        Ok(())
    }

    pub fn type_of(&mut self, key: &[u8]) -> &'static str {
        if self.expire_if_due(key) {
            return "none";
        }
        self.data.get(key).map(Value::type_name).unwrap_or("none")
    }

    // ---- lists ----

    pub fn lpush(&mut self, key: &[u8], value: Vec<u8>) -> SkvResult<usize> {
        self.push(key, value, true)
    }

    pub fn rpush(&mut self, key: &[u8], value: Vec<u8>) -> SkvResult<usize> {
        self.push(key, value, false)
    }

    fn push(&mut self, key: &[u8], value: Vec<u8>, front: bool) -> SkvResult<usize> {
        self.expire_if_due(key);
        let exists_as_list = match self.data.get(key) {
            Some(Value::List(_)) => true,
            Some(_) => return Err(SkvError::TypeConflict),
            None => false,
        };

        if exists_as_list {
            // `growing: Some(key)` — the key being pushed onto must never be
            // its own eviction victim while admitting its own write.
            self.admit(value.len() as u64, Some(key))?;
            let len = match self.data.get_mut(key) {
                Some(Value::List(list)) => {
                    if front {
                        list.push_front(value.clone());
                    } else {
                        list.push_back(value.clone());
                    }
                    list.len()
                }
                _ => unreachable!("checked above"),
            };
            self.track_add(value.len() as u64);
            self.touch(key);
            Ok(len)
        } else {
            let additional = key.len() as u64 + value.len() as u64;
            self.admit(additional, None)?;
            let mut list = std::collections::VecDeque::new();
            list.push_back(value.clone());
            self.data.insert(key.to_vec(), Value::List(list));
            self.track_add(additional);
            self.touch(key);
            Ok(1)
        }
    }

    pub fn lpop(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.pop(key, true)
    }

    pub fn rpop(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.pop(key, false)
    }

    fn pop(&mut self, key: &[u8], front: bool) -> Option<Vec<u8>> {
        self.expire_if_due(key);
        let popped = match self.data.get_mut(key) {
            Some(Value::List(list)) => {
                if front {
                    list.pop_front()
                } else {
                    list.pop_back()
                }
            }
            _ => None,
        }?;
        self.track_sub(popped.len() as u64);

        let now_empty = matches!(self.data.get(key), Some(v) if v.is_empty_container());
        if now_empty {
            self.remove_key(key);
        }
        Some(popped)
    }

    pub fn llen(&mut self, key: &[u8]) -> usize {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::List(l)) => l.len(),
            _ => 0,
        }
    }

    pub fn lindex(&mut self, key: &[u8], index: i64) -> Option<Vec<u8>> {
        self.expire_if_due(key);
        let list = match self.data.get(key) {
            Some(Value::List(l)) => l,
            _ => return None,
        };
        let idx = normalize_index(index, list.len())?;
        list.get(idx).cloned()
    }

    pub fn lrange(&mut self, key: &[u8], start: i64, stop: i64) -> Vec<Vec<u8>> {
        self.expire_if_due(key);
        let list = match self.data.get(key) {
            Some(Value::List(l)) => l,
            _ => return Vec::new(),
        };
        let len = list.len();
        if len == 0 {
            return Vec::new();
        }
        let (lo, hi) = clamp_range(start, stop, len);
        if lo > hi || lo >= len as i64 {
            return Vec::new();
        }
        let (lo, hi) = (lo as usize, hi as usize);
        list.iter().skip(lo).take(hi - lo + 1).cloned().collect()
    }

    // ---- sets ----

    pub fn sadd(&mut self, key: &[u8], member: Vec<u8>) -> SkvResult<bool> {
        self.expire_if_due(key);
        let exists_as_set = match self.data.get(key) {
            Some(Value::Set(_)) => true,
            Some(_) => return Err(SkvError::TypeConflict),
            None => false,
        };

        if exists_as_set {
            let already_member = matches!(self.data.get(key), Some(Value::Set(s)) if s.contains(member.as_slice()));
            if already_member {
                return Ok(false);
            }
            self.admit(member.len() as u64, Some(key))?;
            match self.data.get_mut(key) {
                Some(Value::Set(set)) => {
                    set.insert(member.clone());
                }
                _ => unreachable!("checked above"),
            }
            self.track_add(member.len() as u64);
            self.touch(key);
            Ok(true)
        } else {
            let additional = key.len() as u64 + member.len() as u64;
            self.admit(additional, None)?;
            let mut set = ASet::default();
            set.insert(member);
            self.data.insert(key.to_vec(), Value::Set(set));
            self.track_add(additional);
            self.touch(key);
            Ok(true)
        }
    }

    pub fn srem(&mut self, key: &[u8], member: &[u8]) -> bool {
        self.expire_if_due(key);
        let removed = match self.data.get_mut(key) {
            Some(Value::Set(set)) => set.remove(member),
            _ => false,
        };
        if removed {
            self.track_sub(member.len() as u64);
            let now_empty = matches!(self.data.get(key), Some(v) if v.is_empty_container());
            if now_empty {
                self.remove_key(key);
            }
        }
        removed
    }

    pub fn sismember(&mut self, key: &[u8], member: &[u8]) -> bool {
        self.expire_if_due(key);
        matches!(self.data.get(key), Some(Value::Set(s)) if s.contains(member))
    }

    pub fn scard(&mut self, key: &[u8]) -> usize {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::Set(s)) => s.len(),
            _ => 0,
        }
    }

    pub fn smembers(&mut self, key: &[u8]) -> Vec<Vec<u8>> {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::Set(s)) => s.iter().cloned().collect(),
            _ => Vec::new(),
        }
    }

    // ---- hashes ----

    pub fn hset(&mut self, key: &[u8], field: Vec<u8>, value: Vec<u8>) -> SkvResult<bool> {
        self.expire_if_due(key);
        let exists_as_hash = match self.data.get(key) {
            Some(Value::Hash(_)) => true,
            Some(_) => return Err(SkvError::TypeConflict),
            None => false,
        };

        if exists_as_hash {
            let had_field = matches!(self.data.get(key), Some(Value::Hash(h)) if h.contains_key(field.as_slice()));
            if !had_field {
                self.admit(field.len() as u64 + value.len() as u64, Some(key))?;
            }
            let old_len = if had_field {
                match self.data.get(key) {
                    Some(Value::Hash(h)) => h.get(field.as_slice()).map(|v| v.len() as u64),
                    _ => None,
                }
            } else {
                None
            };
            match self.data.get_mut(key) {
                Some(Value::Hash(h)) => {
                    h.insert(field.clone(), value.clone());
                }
                _ => unreachable!("checked above"),
            }
            if let Some(old_len) = old_len {
                self.track_sub(old_len);
                self.track_add(value.len() as u64);
            } else {
                self.track_add(field.len() as u64 + value.len() as u64);
            }
            self.touch(key);
            Ok(!had_field)
        } else {
            let additional = key.len() as u64 + field.len() as u64 + value.len() as u64;
            self.admit(additional, None)?;
            let mut hash = AMap::default();
            hash.insert(field, value);
            self.data.insert(key.to_vec(), Value::Hash(hash));
            self.track_add(additional);
            self.touch(key);
            Ok(true)
        }
    }

    pub fn hget(&mut self, key: &[u8], field: &[u8]) -> Option<Vec<u8>> {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::Hash(h)) => h.get(field).cloned(),
            _ => None,
        }
    }

    pub fn hdel(&mut self, key: &[u8], field: &[u8]) -> bool {
        self.expire_if_due(key);
        let removed = match self.data.get_mut(key) {
            Some(Value::Hash(h)) => h.remove(field).map(|v| v.len() as u64),
            _ => None,
        };
        if let Some(val_len) = removed {
            self.track_sub(field.len() as u64 + val_len);
            let now_empty = matches!(self.data.get(key), Some(v) if v.is_empty_container());
            if now_empty {
                self.remove_key(key);
            }
            true
        } else {
            false
        }
    }

    pub fn hlen(&mut self, key: &[u8]) -> usize {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::Hash(h)) => h.len(),
            _ => 0,
        }
    }

    pub fn hgetall(&mut self, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.expire_if_due(key);
        match self.data.get(key) {
            Some(Value::Hash(h)) => h.iter().map(|(f, v)| (f.clone(), v.clone())).collect(),
            _ => Vec::new(),
        }
    }

    // ---- TTL ----

    pub fn expire(&mut self, key: &[u8], ttl: Duration) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        if !self.data.contains_key(key) {
            return false;
        }
        self.expiry.insert(key.to_vec(), Instant::now() + ttl);
        true
    }

    pub fn expire_at_unix_secs(&mut self, key: &[u8], unix_secs: i64) -> bool {
        self.expire(key, duration_until_unix(unix_secs * 1000))
    }

    pub fn expire_at_unix_millis(&mut self, key: &[u8], unix_ms: i64) -> bool {
        self.expire(key, duration_until_unix(unix_ms))
    }

    pub fn ttl_seconds(&mut self, key: &[u8]) -> i64 {
        match self.ttl_millis(key) {
            TTL_MISSING => TTL_MISSING,
            TTL_NO_EXPIRY => TTL_NO_EXPIRY,
            ms => ms / 1000,
        }
    }

    pub fn ttl_millis(&mut self, key: &[u8]) -> i64 {
        if self.expire_if_due(key) {
            return TTL_MISSING;
        }
        if !self.data.contains_key(key) {
            return TTL_MISSING;
        }
        match self.expiry.get(key) {
            None => TTL_NO_EXPIRY,
            Some(&deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    0
                } else {
                    (deadline - now).as_millis() as i64
                }
            }
        }
    }

    pub fn persist(&mut self, key: &[u8]) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        self.expiry.remove(key).is_some()
    }

    // ---- admin ----

    pub fn del(&mut self, key: &[u8]) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        self.remove_key(key)
    }

    pub fn exists(&mut self, key: &[u8]) -> bool {
        if self.expire_if_due(key) {
            return false;
        }
        self.data.contains_key(key)
    }

    pub fn keys(&self, pattern: &str) -> Vec<Vec<u8>> {
        let match_all = pattern == "*";
        let compiled = (!match_all).then(|| glob::Pattern::new(pattern).ok()).flatten();
        self.data
            .keys()
            .filter(|k| match_all || matches_pattern(&compiled, k))
            .cloned()
            .collect()
    }

    /// Stateless offset cursor across the single keyspace map. `count` is
    /// the number of *matching* elements to collect before returning a
    /// resumable cursor; `0` means the scan reached the end.
    pub fn scan(&self, cursor: u64, pattern: &str, count: usize) -> (u64, Vec<Vec<u8>>) {
        let count = count.max(1);
        let match_all = pattern.is_empty() || pattern == "*";
        let compiled = (!match_all).then(|| glob::Pattern::new(pattern).ok()).flatten();

        let mut pos: u64 = 0;
        let mut out = Vec::new();
        for key in self.data.keys() {
            let current = pos;
            pos += 1;
            if current < cursor {
                continue;
            }
            if match_all || matches_pattern(&compiled, key) {
                out.push(key.clone());
            }
            if out.len() >= count {
                return (pos, out);
            }
        }
        (0, out)
    }

    pub fn flush(&mut self) {
        self.data.clear();
        self.expiry.clear();
        self.lru = Lru::new();
        self.used_bytes = 0;
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    // ---- pub/sub ----

    pub fn subscribe(&mut self, channel: &[u8], conn: ConnId) {
        self.channels.entry(channel.to_vec()).or_default().insert(conn);
    }

    pub fn unsubscribe(&mut self, channel: &[u8], conn: ConnId) {
        if let Some(set) = self.channels.get_mut(channel) {
            set.remove(&conn);
            if set.is_empty() {
                self.channels.remove(channel);
            }
        }
    }

    /// Removes `conn` from every channel it was subscribed to — called
    /// once, synchronously, on connection close.
    pub fn unsubscribe_all(&mut self, conn: ConnId) {
        self.channels.retain(|_, set| {
            set.remove(&conn);
            !set.is_empty()
        });
    }

    /// Snapshot of subscriber handles for `channel`; the host does the
    /// actual socket writes, the core does no I/O of its own.
    pub fn subscribers(&self, channel: &[u8]) -> Vec<ConnId> {
        self.channels
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn matches_pattern(compiled: &Option<glob::Pattern>, key: &[u8]) -> bool {
    match compiled {
        Some(pattern) => pattern.matches(&String::from_utf8_lossy(key)),
        None => false,
    }
}

/// Converts a negative Redis-style index to a forward offset; `None` when
/// out of range either way.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    if idx < 0 || idx >= len {
        None
    } else {
        Some(idx as usize)
    }
}

/// Normalizes a Redis-style `LRANGE` bound pair (negative-from-end,
/// inclusive). The caller checks `lo > hi` / `lo >= len` to detect an empty
/// result — this function only translates indices, it does not clamp them
/// into range, so an out-of-range `start` stays detectably out of range.
fn clamp_range(start: i64, stop: i64, len: usize) -> (i64, i64) {
    let len_i = len as i64;
    let norm = |i: i64| -> i64 { if i < 0 { len_i + i } else { i } };
    let lo = norm(start).max(0);
    let hi = norm(stop).min(len_i - 1);
    (lo, hi)
}

fn duration_until_unix(target_unix_ms: i64) -> Duration {
    let now_wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let target_ms = target_unix_ms.max(0) as u64;
    let target = Duration::from_millis(target_ms);
    target.saturating_sub(now_wall)
}
