//! Index-based intrusive doubly-linked recency list.
//!
//! Adapted from the sharded engine's arena/free-list node pool, collapsed to
//! a single unsharded instance: the keyspace store is owned by exactly one
//! caller, so there is nothing left to shard.

use rand::seq::IteratorRandom;

use crate::types::AMap;

struct Node {
    key: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Active only when a memory cap is configured; touched on every read/write
/// hit and consulted by eviction.
#[derive(Default)]
pub(crate) struct Lru {
    index: AMap<usize>,
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Lru {
    pub(crate) fn new() -> Self {
        Lru::default()
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().expect("node exists");
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().expect("node exists").next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().expect("node exists").prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_back(&mut self, idx: usize) {
        let tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = tail;
            node.next = None;
        }
        match tail {
            Some(t) => self.nodes[t].as_mut().expect("node exists").next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    /// Moves `key` to the most-recently-used end, inserting a fresh node if
    /// it isn't already tracked.
    pub(crate) fn touch(&mut self, key: &[u8]) {
        if let Some(&idx) = self.index.get(key) {
            if self.tail == Some(idx) {
                return;
            }
            self.detach(idx);
            self.push_back(idx);
            return;
        }

        let idx = self.free.pop().unwrap_or_else(|| {
            self.nodes.push(None);
            self.nodes.len() - 1
        });
        self.nodes[idx] = Some(Node {
            key: key.to_vec(),
            prev: None,
            next: None,
        });
        self.push_back(idx);
        self.index.insert(key.to_vec(), idx);
    }

    /// Drops `key` from the list if present. A no-op for untracked keys, so
    /// callers can remove unconditionally without checking membership first.
    pub(crate) fn remove(&mut self, key: &[u8]) {
        if let Some(idx) = self.index.remove(key) {
            self.detach(idx);
            self.nodes[idx] = None;
            self.free.push(idx);
        }
    }

    /// Pops and returns the least-recently-touched key (front of the list),
    /// skipping `exclude` if given. `exclude` names the key an in-flight
    /// write is growing — it must not be able to evict itself to make room
    /// for its own write.
    pub(crate) fn pop_front(&mut self, exclude: Option<&[u8]>) -> Option<Vec<u8>> {
        let mut idx = self.head;
        while let Some(i) = idx {
            let node = self.nodes[i].as_ref().expect("node exists");
            if Some(node.key.as_slice()) != exclude {
                let key = node.key.clone();
                self.remove(&key);
                return Some(key);
            }
            idx = node.next;
        }
        None
    }

    /// Pops and returns a uniformly random key from the tracked set,
    /// skipping `exclude` if given (see [`Lru::pop_front`]).
    pub(crate) fn pop_random(&mut self, exclude: Option<&[u8]>) -> Option<Vec<u8>> {
        let key = self
            .index
            .keys()
            .filter(|k| Some(k.as_slice()) != exclude)
            .choose(&mut rand::thread_rng())
            .cloned()?;
        self.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_moves_key_to_back() {
        let mut lru = Lru::new();
        lru.touch(b"a");
        lru.touch(b"b");
        lru.touch(b"c");
        lru.touch(b"a");
        assert_eq!(lru.pop_front(None).as_deref(), Some(&b"b"[..]));
        assert_eq!(lru.pop_front(None).as_deref(), Some(&b"c"[..]));
        assert_eq!(lru.pop_front(None).as_deref(), Some(&b"a"[..]));
        assert_eq!(lru.pop_front(None), None);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut lru = Lru::new();
        lru.touch(b"a");
        lru.remove(b"a");
        lru.remove(b"a");
        assert_eq!(lru.pop_front(None), None);
    }

    #[test]
    fn pop_front_skips_excluded_key() {
        let mut lru = Lru::new();
        lru.touch(b"a");
        lru.touch(b"b");
        assert_eq!(lru.pop_front(Some(b"a")).as_deref(), Some(&b"b"[..]));
        assert_eq!(lru.pop_front(Some(b"a")), None);
    }
}
