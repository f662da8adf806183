use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use crate::cache::store::{CacheOp, CacheStore};

/// Shared-cache client over a multiplexed connection manager.
///
/// The manager owns one server connection and re-establishes it on failure;
/// cloning is cheap and every operation works on a clone, so concurrent
/// callers multiplex without in-process locking.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
}

impl RedisCacheStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut con = self.conn();
        let v: Option<String> = redis::cmd("GET").arg(key).query_async(&mut con).await?;
        Ok(v)
    }

    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let mut con = self.conn();
        let v: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut con).await?;
        Ok(v)
    }

    async fn zcard(&self, key: &str) -> anyhow::Result<u64> {
        let mut con = self.conn();
        let v: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut con).await?;
        Ok(v)
    }

    async fn zscore(&self, key: &str, member: &str) -> anyhow::Result<Option<f64>> {
        let mut con = self.conn();
        let v: Option<f64> = redis::cmd("ZSCORE")
            .arg(key)
            .arg(member)
            .query_async(&mut con)
            .await?;
        Ok(v)
    }

    async fn zrevrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>> {
        let mut con = self.conn();
        let v: Option<u64> = redis::cmd("ZREVRANK")
            .arg(key)
            .arg(member)
            .query_async(&mut con)
            .await?;
        Ok(v)
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> anyhow::Result<Vec<(String, f64)>> {
        let mut con = self.conn();
        let v: Vec<(String, f64)> = redis::cmd("ZREVRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .arg("WITHSCORES")
            .query_async(&mut con)
            .await?;
        Ok(v)
    }

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut con = self.conn();
        let v: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut con).await?;
        Ok(v)
    }

    async fn scan_match(&self, pattern: &str) -> anyhow::Result<Vec<String>> {
        let mut con = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut con)
                .await?;

            keys.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn apply(&self, ops: &[CacheOp]) -> anyhow::Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();

        for op in ops {
            match op {
                CacheOp::SetEx {
                    key,
                    value,
                    ttl_secs,
                } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(*ttl_secs)
                        .ignore();
                }
                CacheOp::HSet { key, fields } => {
                    let cmd = pipe.cmd("HSET").arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                    cmd.ignore();
                }
                CacheOp::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD")
                        .arg(key)
                        .arg(*score)
                        .arg(member)
                        .ignore();
                }
                CacheOp::SAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                CacheOp::SRem { key, member } => {
                    pipe.cmd("SREM").arg(key).arg(member).ignore();
                }
                CacheOp::Expire { key, ttl_secs } => {
                    pipe.cmd("EXPIRE").arg(key).arg(*ttl_secs).ignore();
                }
                CacheOp::Del { key } => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
            }
        }

        let mut con = self.conn();
        let _: () = pipe.query_async(&mut con).await?;
        Ok(())
    }
}
