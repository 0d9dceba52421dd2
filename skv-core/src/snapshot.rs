//! Binary snapshot codec: versioned format, atomic write, absolute-to-
//! remaining-ms expiry translation on the wire.
//!
//! Format (version 2), little-endian:
//!
//! ```text
//! header := magic[4] = 'S','K','V','2'
//! entry  := type[1] key_len[u32] key_bytes payload expiry
//! payload(string) := val_len[u32] val_bytes
//! payload(list)   := count[u32] (elem_len[u32] elem_bytes)*count
//! payload(set)    := count[u32] (elem_len[u32] elem_bytes)*count
//! payload(hash)   := count[u32] (field_len[u32] field val_len[u32] val)*count
//! expiry          := has[1] (has==1 -> remaining_ms[i64])
//! type in {0:string, 1:list, 2:set, 3:hash}
//! ```
//!
//! Version 1 (legacy, string-only, no TTLs) is detected when the first 4
//! bytes don't match the magic: they're reinterpreted as the first entry's
//! `key_len`.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use skv_common::{SkvError, SkvResult};

use crate::types::AMap;
use crate::value::Value;

const MAGIC_V2: &[u8; 4] = b"SKV2";

const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_SET: u8 = 2;
const TYPE_HASH: u8 = 3;

pub(crate) struct Loaded {
    pub(crate) entries: Vec<(Vec<u8>, Value)>,
    pub(crate) expiry: Vec<(Vec<u8>, Instant)>,
}

/// Writes the keyspace to `path` atomically: `path.tmp`, flush, fsync,
/// rename over `path`. A crash before the rename leaves the previous
/// snapshot, if any, intact.
pub(crate) fn save(data: &AMap<Value>, expiry: &AMap<Instant>, path: &Path) -> SkvResult<()> {
    let tmp_path = tmp_path_for(path);
    write_tmp(data, expiry, &tmp_path).map_err(|e| SkvError::save_failed(path.to_path_buf(), e))?;
    fs::rename(&tmp_path, path).map_err(|e| SkvError::save_failed(path.to_path_buf(), e))?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    std::path::PathBuf::from(os)
}

fn write_tmp(data: &AMap<Value>, expiry: &AMap<Instant>, tmp_path: &Path) -> io::Result<()> {
    let file = File::create(tmp_path)?;
    let mut out = BufWriter::new(file);
    let now = Instant::now();

    out.write_all(MAGIC_V2)?;

    for (key, value) in data.iter() {
        let type_tag = match value {
            Value::Str(_) => TYPE_STRING,
            Value::List(_) => TYPE_LIST,
            Value::Set(_) => TYPE_SET,
            Value::Hash(_) => TYPE_HASH,
        };
        out.write_all(&[type_tag])?;
        write_bytes(&mut out, key)?;

        match value {
            Value::Str(s) => write_bytes(&mut out, s)?,
            Value::List(list) => {
                write_u32(&mut out, list.len() as u32)?;
                for elem in list {
                    write_bytes(&mut out, elem)?;
                }
            }
            Value::Set(set) => {
                write_u32(&mut out, set.len() as u32)?;
                for member in set {
                    write_bytes(&mut out, member)?;
                }
            }
            Value::Hash(hash) => {
                write_u32(&mut out, hash.len() as u32)?;
                for (field, val) in hash {
                    write_bytes(&mut out, field)?;
                    write_bytes(&mut out, val)?;
                }
            }
        }

        write_expiry(&mut out, expiry.get(key), now)?;
    }

    out.flush()?;
    out.get_ref().sync_all()?;
    Ok(())
}

fn write_u32(out: &mut impl Write, n: u32) -> io::Result<()> {
    out.write_all(&n.to_le_bytes())
}

fn write_bytes(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    write_u32(out, bytes.len() as u32)?;
    out.write_all(bytes)
}

fn write_expiry(out: &mut impl Write, deadline: Option<&Instant>, now: Instant) -> io::Result<()> {
    match deadline {
        None => out.write_all(&[0]),
        Some(&deadline) => {
            let remaining_ms = deadline
                .checked_duration_since(now)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            out.write_all(&[1])?;
            out.write_all(&remaining_ms.to_le_bytes())
        }
    }
}

/// Loads a snapshot, auto-detecting v2 vs. the legacy v1 string-only format.
pub(crate) fn load(path: &Path) -> SkvResult<Loaded> {
    let file = File::open(path).map_err(|e| SkvError::load_failed(path.to_path_buf(), e))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; 4];
    read_exact_or_err(&mut reader, &mut header, path)?;

    if &header == MAGIC_V2 {
        load_v2(&mut reader, path)
    } else {
        let first_key_len = u32::from_le_bytes(header);
        load_v1(&mut reader, first_key_len, path)
    }
}

fn read_exact_or_err(reader: &mut impl Read, buf: &mut [u8], path: &Path) -> SkvResult<()> {
    reader
        .read_exact(buf)
        .map_err(|e| SkvError::load_failed(path.to_path_buf(), e))
}

fn read_u32(reader: &mut impl Read, path: &Path) -> SkvResult<u32> {
    let mut buf = [0u8; 4];
    read_exact_or_err(reader, &mut buf, path)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_bytes(reader: &mut impl Read, path: &Path) -> SkvResult<Vec<u8>> {
    let len = read_u32(reader, path)? as usize;
    let mut buf = vec![0u8; len];
    read_exact_or_err(reader, &mut buf, path)?;
    Ok(buf)
}

/// Outcome of reading one entry's `has[1] remaining_ms[i64]?` trailer.
/// `Expired` and `NoTtl` both mean "no live deadline" but only `Expired`
/// means the whole entry must be dropped rather than just the TTL.
enum ExpiryOutcome {
    NoTtl,
    Expired,
    Active(Instant),
}

fn read_expiry(reader: &mut impl Read, path: &Path) -> SkvResult<ExpiryOutcome> {
    let mut has = [0u8; 1];
    read_exact_or_err(reader, &mut has, path)?;
    if has[0] == 0 {
        return Ok(ExpiryOutcome::NoTtl);
    }
    let mut ms_buf = [0u8; 8];
    read_exact_or_err(reader, &mut ms_buf, path)?;
    let remaining_ms = i64::from_le_bytes(ms_buf);
    if remaining_ms <= 0 {
        Ok(ExpiryOutcome::Expired)
    } else {
        Ok(ExpiryOutcome::Active(
            Instant::now() + Duration::from_millis(remaining_ms as u64),
        ))
    }
}

fn load_v2(reader: &mut impl Read, path: &Path) -> SkvResult<Loaded> {
    let mut entries = Vec::new();
    let mut expiry = Vec::new();

    loop {
        let mut type_buf = [0u8; 1];
        match reader.read(&mut type_buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => return Err(SkvError::load_failed(path.to_path_buf(), e)),
        }

        let key = read_bytes(reader, path)?;

        let value = match type_buf[0] {
            TYPE_STRING => Value::Str(read_bytes(reader, path)?),
            TYPE_LIST => {
                let count = read_u32(reader, path)?;
                let mut list = VecDeque::with_capacity(count as usize);
                for _ in 0..count {
                    list.push_back(read_bytes(reader, path)?);
                }
                Value::List(list)
            }
            TYPE_SET => {
                let count = read_u32(reader, path)?;
                let mut set = crate::types::ASet::default();
                for _ in 0..count {
                    set.insert(read_bytes(reader, path)?);
                }
                Value::Set(set)
            }
            TYPE_HASH => {
                let count = read_u32(reader, path)?;
                let mut hash = AMap::default();
                for _ in 0..count {
                    let field = read_bytes(reader, path)?;
                    let val = read_bytes(reader, path)?;
                    hash.insert(field, val);
                }
                Value::Hash(hash)
            }
            other => {
                return Err(SkvError::load_failed(
                    path.to_path_buf(),
                    format!("unknown entry type tag {other}"),
                ));
            }
        };

        match read_expiry(reader, path)? {
            ExpiryOutcome::Expired => continue,
            ExpiryOutcome::Active(deadline) => expiry.push((key.clone(), deadline)),
            ExpiryOutcome::NoTtl => {}
        }
        entries.push((key, value));
    }

    Ok(Loaded { entries, expiry })
}

fn load_v1(reader: &mut impl Read, first_key_len: u32, path: &Path) -> SkvResult<Loaded> {
    let mut entries = Vec::new();
    let mut key_len = first_key_len;

    loop {
        let mut key = vec![0u8; key_len as usize];
        if reader.read_exact(&mut key).is_err() {
            break;
        }

        let val_len = match read_u32(reader, path) {
            Ok(n) => n,
            Err(_) => break,
        };
        let mut value = vec![0u8; val_len as usize];
        if reader.read_exact(&mut value).is_err() {
            break;
        }

        entries.push((key, Value::Str(value)));

        key_len = match read_u32(reader, path) {
            Ok(n) => n,
            Err(_) => break,
        };
    }

    Ok(Loaded { entries, expiry: Vec::new() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace::KeyspaceStore;
    use skv_common::Config;

    #[test]
    fn round_trips_all_value_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.skv");

        let mut cfg = Config::default();
        cfg.snapshot_path = Some(path.clone());
        let mut store = KeyspaceStore::new(&cfg);

        store.set(b"str".to_vec(), b"hello".to_vec()).unwrap();
        store.rpush(b"list", b"a".to_vec()).unwrap();
        store.rpush(b"list", b"b".to_vec()).unwrap();
        store.sadd(b"set", b"x".to_vec()).unwrap();
        store.hset(b"hash", b"f".to_vec(), b"v".to_vec()).unwrap();
        store.set(b"expiring".to_vec(), b"soon".to_vec()).unwrap();
        store.expire(b"expiring", Duration::from_secs(60));

        store.save(None).unwrap();

        let loaded = KeyspaceStore::load_from_snapshot(&path, &cfg).unwrap();
        let mut loaded = loaded;
        assert_eq!(loaded.get(b"str"), Some(b"hello".to_vec()));
        assert_eq!(loaded.lrange(b"list", 0, -1), vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(loaded.sismember(b"set", b"x"));
        assert_eq!(loaded.hget(b"hash", b"f"), Some(b"v".to_vec()));
        assert!(loaded.ttl_seconds(b"expiring") > 0);
    }

    #[test]
    fn discards_expired_entries_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.skv");

        let cfg = Config::default();
        let mut store = KeyspaceStore::new(&cfg);
        store.set(b"gone".to_vec(), b"v".to_vec()).unwrap();
        store.expire(b"gone", Duration::from_millis(0));
        store.save(Some(&path)).unwrap();

        let mut loaded = KeyspaceStore::load_from_snapshot(&path, &cfg).unwrap();
        assert_eq!(loaded.get(b"gone"), None);
    }

    #[test]
    fn save_is_atomic_via_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.skv");
        let tmp = tmp_path_for(&path);

        let cfg = Config::default();
        let mut store = KeyspaceStore::new(&cfg);
        store.set(b"k".to_vec(), b"v".to_vec()).unwrap();
        store.save(Some(&path)).unwrap();

        assert!(path.exists());
        assert!(!tmp.exists());
    }
}
