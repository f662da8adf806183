use std::collections::HashMap;

use async_trait::async_trait;

/// One write in a pipelined batch.
#[derive(Clone, Debug, PartialEq)]
pub enum CacheOp {
    SetEx {
        key: String,
        value: String,
        ttl_secs: i64,
    },
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    SAdd {
        key: String,
        member: String,
    },
    SRem {
        key: String,
        member: String,
    },
    Expire {
        key: String,
        ttl_secs: i64,
    },
    Del {
        key: String,
    },
}

/// Client surface over the shared key-value / sorted-set server.
///
/// `apply` submits a batch as one pipelined round-trip: ordered, and either
/// accepted or rejected as a whole by the server. Individual reads are
/// point operations; `scan_match` drives a full cursor loop.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    async fn hgetall(&self, key: &str) -> anyhow::Result<HashMap<String, String>>;

    async fn zcard(&self, key: &str) -> anyhow::Result<u64>;

    async fn zscore(&self, key: &str, member: &str) -> anyhow::Result<Option<f64>>;

    /// 0-based rank in descending score order; `None` if absent.
    async fn zrevrank(&self, key: &str, member: &str) -> anyhow::Result<Option<u64>>;

    /// Inclusive `[start, stop]` slice in descending score order, with
    /// scores. Negative indices count from the end, as the server does.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> anyhow::Result<Vec<(String, f64)>>;

    async fn smembers(&self, key: &str) -> anyhow::Result<Vec<String>>;

    /// Cursor-based SCAN until exhaustion; returns every matching key.
    async fn scan_match(&self, pattern: &str) -> anyhow::Result<Vec<String>>;

    /// Pipelined batch submit.
    async fn apply(&self, ops: &[CacheOp]) -> anyhow::Result<()>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: i64) -> anyhow::Result<()> {
        self.apply(&[CacheOp::SetEx {
            key: key.to_string(),
            value: value.to_string(),
            ttl_secs,
        }])
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> anyhow::Result<()> {
        self.apply(&[CacheOp::SRem {
            key: key.to_string(),
            member: member.to_string(),
        }])
        .await
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        self.apply(&[CacheOp::Del {
            key: key.to_string(),
        }])
        .await
    }
}
