use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BidError;

/// Token payload. Self-describing: carries enough identity to serve a
/// request without touching the durable store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    /// Expiry, seconds since epoch.
    pub exp: i64,
    /// Issued at, seconds since epoch.
    pub iat: i64,
}

pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expire_minutes: i64,
}

impl JwtCodec {
    pub fn new(secret: &str, expire_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expire_minutes,
        }
    }

    pub fn issue(&self, user_id: &Uuid, username: &str, now_ms: i64) -> Result<String, BidError> {
        let iat = now_ms / 1000;
        let claims = Claims {
            user_id: *user_id,
            username: username.to_string(),
            exp: iat + self.expire_minutes * 60,
            iat,
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(BidError::internal)
    }

    /// Signature and expiry validation only; no I/O.
    pub fn decode(&self, token: &str) -> Result<Claims, BidError> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
            .map_err(|_| BidError::Unauthenticated)
    }
}
