//! The typed value stored per key.
//!
//! A single map keyed by byte string holds every variant, so "a key is
//! exactly one type" is structural rather than a runtime probe across four
//! separate maps (see the workspace design notes on this redesign).

use std::collections::VecDeque;

use crate::types::{AMap, ASet};

#[derive(Debug, Clone)]
pub enum Value {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Set(ASet<Vec<u8>>),
    Hash(AMap<Vec<u8>>),
}

impl Value {
    /// The dispatcher-facing type name: `string|list|set|hash`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
        }
    }

    /// True when the container holds no elements. Strings are never "empty
    /// containers" in the sense that matters for key removal — an empty
    /// string is still a live value.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Hash(h) => h.is_empty(),
        }
    }

    /// Payload bytes owned by this value, excluding the key itself —
    /// matches the memory-accounting units `check_memory` works in.
    pub fn payload_bytes(&self) -> u64 {
        match self {
            Value::Str(s) => s.len() as u64,
            Value::List(l) => l.iter().map(|e| e.len() as u64).sum(),
            Value::Set(s) => s.iter().map(|e| e.len() as u64).sum(),
            Value::Hash(h) => h
                .iter()
                .map(|(f, v)| f.len() as u64 + v.len() as u64)
                .sum(),
        }
    }
}
