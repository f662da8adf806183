use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::instrument;
use uuid::Uuid;

use crate::auth::jwt::{Claims, JwtCodec};
use crate::cache::keys;
use crate::cache::store::{CacheOp, CacheStore};
use crate::error::BidError;
use crate::user::model::User;

const USER_HASH_TTL_SECS: i64 = 60 * 60 * 24;

/// Caller identity attached to a request.
#[derive(Clone, Debug)]
pub struct AuthedUser {
    pub user_id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub weight: f64,
}

/// Resolves bearer tokens to identities without touching the durable
/// store: token signature first, then a bounded in-process cache that
/// shields the shared cache during bursts, then the shared user hash.
pub struct AuthContext {
    codec: JwtCodec,
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    max_entries: usize,
    tokens: Mutex<HashMap<String, (Instant, AuthedUser)>>,
}

impl AuthContext {
    pub fn new(
        codec: JwtCodec,
        store: Arc<dyn CacheStore>,
        ttl: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            codec,
            store,
            ttl,
            max_entries,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn codec(&self) -> &JwtCodec {
        &self.codec
    }

    #[instrument(skip_all, target = "auth")]
    pub async fn identify(&self, token: &str) -> Result<AuthedUser, BidError> {
        let claims = self.codec.decode(token)?;

        if let Some(user) = self.token_cache_get(token) {
            return Ok(user);
        }

        let hash = self
            .store
            .hgetall(&keys::user_hash(&claims.user_id))
            .await
            .map_err(BidError::unavailable)?;

        let user = if hash.is_empty() {
            // Cache expired but the token is valid: reconstruct a minimal
            // identity from the claims. Weight and admin status refresh on
            // the next login.
            AuthedUser {
                user_id: claims.user_id,
                username: claims.username.clone(),
                is_admin: false,
                weight: 1.0,
            }
        } else {
            user_from_hash(&claims, &hash)
        };

        self.token_cache_put(token, user.clone());
        Ok(user)
    }

    /// Publishes the user's identity hash for fast authentication; called
    /// on login. Same lifetime as the token it backs.
    pub async fn cache_user(&self, user: &User) -> anyhow::Result<()> {
        let key = keys::user_hash(&user.user_id);
        self.store
            .apply(&[
                CacheOp::HSet {
                    key: key.clone(),
                    fields: vec![
                        ("id".into(), user.user_id.to_string()),
                        ("username".into(), user.username.clone()),
                        ("email".into(), user.email.clone()),
                        ("weight".into(), user.weight.to_string()),
                        (
                            "is_admin".into(),
                            if user.is_admin { "1" } else { "0" }.into(),
                        ),
                    ],
                },
                CacheOp::Expire {
                    key,
                    ttl_secs: USER_HASH_TTL_SECS,
                },
            ])
            .await
    }

    fn token_cache_get(&self, token: &str) -> Option<AuthedUser> {
        let mut tokens = self.tokens.lock();
        match tokens.get(token) {
            Some((deadline, _)) if *deadline <= Instant::now() => {
                tokens.remove(token);
                None
            }
            Some((_, user)) => Some(user.clone()),
            None => None,
        }
    }

    fn token_cache_put(&self, token: &str, user: AuthedUser) {
        let mut tokens = self.tokens.lock();

        if self.max_entries > 0
            && tokens.len() >= self.max_entries
            && !tokens.contains_key(token)
        {
            // Drop the entry that expires soonest to keep memory bounded.
            let victim = tokens
                .iter()
                .min_by_key(|(_, (deadline, _))| *deadline)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                tokens.remove(&victim);
            }
        }

        tokens.insert(token.to_string(), (Instant::now() + self.ttl, user));
    }
}

fn user_from_hash(claims: &Claims, hash: &HashMap<String, String>) -> AuthedUser {
    AuthedUser {
        user_id: claims.user_id,
        username: hash
            .get("username")
            .cloned()
            .unwrap_or_else(|| claims.username.clone()),
        is_admin: hash.get("is_admin").map(String::as_str) == Some("1"),
        weight: hash
            .get("weight")
            .and_then(|w| w.parse().ok())
            .unwrap_or(1.0),
    }
}
