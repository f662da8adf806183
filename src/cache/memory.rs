//! In-process implementation of [`CacheStore`].
//!
//! Backs tests and `memory://` development runs. Behavior mirrors the
//! server contract the core depends on: per-key TTLs, pipelined batches
//! applied under one lock, and descending-score reads with equal scores
//! ordered by member string so ranking ties stay deterministic.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::store::{CacheOp, CacheStore};
use crate::time::now_ms;

#[derive(Clone, Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Clone, Debug)]
struct Entry {
    value: Value,
    expires_at_ms: Option<i64>,
}

#[derive(Default)]
pub struct MemoryCacheStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted (member, score) view of a zset: score descending, then
    /// member ascending.
    fn sorted_desc(zset: &HashMap<String, f64>) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        out.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        out
    }

    #[cfg(test)]
    fn force_expire(&self, key: &str) {
        if let Some(entry) = self.inner.lock().get_mut(key) {
            entry.expires_at_ms = Some(now_ms() - 1);
        }
    }
}

fn live<'a>(map: &'a mut HashMap<String, Entry>, key: &str, now: i64) -> Option<&'a mut Entry> {
    if let Some(entry) = map.get(key) {
        if entry.expires_at_ms.is_some_and(|at| at <= now) {
            map.remove(key);
            return None;
        }
    }
    map.get_mut(key)
}

fn glob_matches(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;

    if let Some(first) = parts.first() {
        if !rest.starts_with(first) {
            return false;
        }
        rest = &rest[first.len()..];
    }

    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(parts[parts.len() - 1])
}

fn apply_one(map: &mut HashMap<String, Entry>, op: &CacheOp, now: i64) {
    match op {
        CacheOp::SetEx {
            key,
            value,
            ttl_secs,
        } => {
            map.insert(
                key.clone(),
                Entry {
                    value: Value::Str(value.clone()),
                    expires_at_ms: Some(now + ttl_secs * 1000),
                },
            );
        }
        CacheOp::HSet { key, fields } => {
            let _ = live(map, key, now);
            let entry = map.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at_ms: None,
            });
            if let Value::Hash(hash) = &mut entry.value {
                for (f, v) in fields {
                    hash.insert(f.clone(), v.clone());
                }
            } else {
                entry.value = Value::Hash(fields.iter().cloned().collect());
            }
        }
        CacheOp::ZAdd { key, member, score } => {
            let _ = live(map, key, now);
            let entry = map.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::ZSet(HashMap::new()),
                expires_at_ms: None,
            });
            if let Value::ZSet(zset) = &mut entry.value {
                zset.insert(member.clone(), *score);
            } else {
                entry.value = Value::ZSet(HashMap::from([(member.clone(), *score)]));
            }
        }
        CacheOp::SAdd { key, member } => {
            let _ = live(map, key, now);
            let entry = map.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at_ms: None,
            });
            if let Value::Set(set) = &mut entry.value {
                set.insert(member.clone());
            } else {
                entry.value = Value::Set(HashSet::from([member.clone()]));
            }
        }
        CacheOp::SRem { key, member } => {
            if let Some(Entry {
                value: Value::Set(set),
                ..
            }) = live(map, key, now)
            {
                set.remove(member);
            }
        }
        CacheOp::Expire { key, ttl_secs } => {
            if let Some(entry) = live(map, key, now) {
                entry.expires_at_ms = Some(now + ttl_secs * 1000);
            }
        }
        CacheOp::Del { key } => {
            map.remove(key);
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut map = self.inner.lock();
        Ok(match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Some(s.clone()),
            _ => None,
        })
    }

    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let mut map = self.inner.lock();
        Ok(match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => hash.clone(),
            _ => HashMap::new(),
        })
    }

    async fn zcard(&self, key: &str) -> anyhow::Result<u64> {
        let mut map = self.inner.lock();
        Ok(match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => zset.len() as u64,
            _ => 0,
        })
    }

    async fn zscore(&self, key: &str, member: &str) -> anyhow::Result<Option<f64>> {
        let mut map = self.inner.lock();
        Ok(match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => zset.get(member).copied(),
            _ => None,
        })
    }

    async fn zrevrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>> {
        let mut map = self.inner.lock();
        Ok(match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Self::sorted_desc(zset)
                .iter()
                .position(|(m, _)| m == member)
                .map(|i| i as u64),
            _ => None,
        })
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        let mut map = self.inner.lock();
        let sorted = match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => Self::sorted_desc(zset),
            _ => return Ok(Vec::new()),
        };

        let n = sorted.len() as i64;
        let norm = |i: i64| if i < 0 { i + n } else { i };
        let from = norm(start).max(0);
        let to = norm(stop).min(n - 1);

        if n == 0 || from > to || from >= n {
            return Ok(Vec::new());
        }

        Ok(sorted[from as usize..=to as usize].to_vec())
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut map = self.inner.lock();
        Ok(match live(&mut map, key, now_ms()) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => set.iter().cloned().collect(),
            _ => Vec::new(),
        })
    }

    async fn scan_match(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let now = now_ms();
        let map = self.inner.lock();
        Ok(map
            .iter()
            .filter(|(_, e)| !e.expires_at_ms.is_some_and(|at| at <= now))
            .map(|(k, _)| k)
            .filter(|k| glob_matches(pattern, k))
            .cloned()
            .collect())
    }

    async fn apply(&self, ops: &[CacheOp]) -> anyhow::Result<()> {
        let now = now_ms();
        let mut map = self.inner.lock();
        for op in ops {
            apply_one(&mut map, op, now);
        }
        Ok(())
    }
}
