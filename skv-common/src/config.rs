//! Host-facing configuration, constructed once by the caller and handed to
//! `skv-core` as a plain value (spec §6: "Constructed by the host and set
//! once").

use std::path::PathBuf;

/// Eviction strategy applied when a write would exceed `max_memory_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Admission fails with `OutOfMemory` instead of evicting.
    #[default]
    None,
    /// Evict the least-recently-touched key first.
    AllKeysLru,
    /// Evict a uniformly random key.
    AllKeysRandom,
}

/// Configuration for a `KeyspaceStore` and the host that drives it.
///
/// `max_memory_bytes == 0` means unlimited (no admission checks, no LRU
/// bookkeeping).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Address the TCP listener binds to, e.g. `"127.0.0.1:6380"`.
    pub bind_addr: String,
    /// Memory cap in bytes tracked by `check_memory`; 0 disables the cap.
    pub max_memory_bytes: u64,
    /// Eviction policy used once the cap is exceeded.
    pub eviction_policy: EvictionPolicy,
    /// Path used by `LOAD`/`FLUSH ... SAVE` and by the optional startup load.
    pub snapshot_path: Option<PathBuf>,
    /// Interval, in milliseconds, between background `sweep_expired` ticks.
    pub sweep_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:6380".to_string(),
            max_memory_bytes: 0,
            eviction_policy: EvictionPolicy::default(),
            snapshot_path: None,
            sweep_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Parses a TOML configuration file, falling back to defaults for any
    /// field the file omits.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_memory_cap() {
        let cfg = Config::default();
        assert_eq!(cfg.max_memory_bytes, 0);
        assert_eq!(cfg.eviction_policy, EvictionPolicy::None);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg = Config::from_toml_str(
            r#"
            max_memory_bytes = 1048576
            eviction_policy = "allkeys-lru"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.max_memory_bytes, 1_048_576);
        assert_eq!(cfg.eviction_policy, EvictionPolicy::AllKeysLru);
        assert_eq!(cfg.bind_addr, "127.0.0.1:6380");
    }
}
