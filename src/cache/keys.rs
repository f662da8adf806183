//! Shared-cache key layout.
//!
//! Every key the service touches is minted here so the namespace stays in
//! one place.

use uuid::Uuid;

/// Set of session ids with bids not yet persisted durably.
pub const DIRTY_SESSIONS: &str = "dirty_sessions";

/// Hash: alpha / beta / gamma / start_ms / end_ms.
pub fn session_params(session_id: &Uuid) -> String {
    format!("session:params:{session_id}")
}

/// String: "active" or the cached rejection reason.
pub fn session_active(session_id: &Uuid) -> String {
    format!("session:active:{session_id}")
}

/// String: the session's minimum acceptable bid.
pub fn session_upset_price(session_id: &Uuid) -> String {
    format!("session:upset_price:{session_id}")
}

/// String: the user's scoring weight.
pub fn user_weight(user_id: &Uuid) -> String {
    format!("user:weight:{user_id}")
}

/// Hash: cached identity fields for authentication.
pub fn user_hash(user_id: &Uuid) -> String {
    format!("user:{user_id}")
}

/// Sorted set: (score, user_id) per session, descending reads.
pub fn ranking(session_id: &Uuid) -> String {
    format!("ranking:{session_id}")
}

/// Hash: price / score / response_time / timestamp for one bid.
pub fn bid(session_id: &Uuid, user_id: &Uuid) -> String {
    format!("bid:{session_id}:{user_id}")
}

/// Hash mirror consumed by the batch persister.
pub fn bid_metadata(session_id: &Uuid, user_id: &Uuid) -> String {
    format!("bid_metadata:{session_id}:{user_id}")
}

/// SCAN pattern matching every metadata hash of one session.
pub fn bid_metadata_pattern(session_id: &Uuid) -> String {
    format!("bid_metadata:{session_id}:*")
}

/// Recovers the user id from a `bid_metadata:{session}:{user}` key.
pub fn bid_metadata_user(key: &str) -> Option<Uuid> {
    key.rsplit(':').next().and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_key_round_trips_user_id() {
        let session = Uuid::new_v4();
        let user = Uuid::new_v4();
        let key = bid_metadata(&session, &user);
        assert_eq!(bid_metadata_user(&key), Some(user));
    }

    #[test]
    fn metadata_user_rejects_garbage() {
        assert_eq!(bid_metadata_user("bid_metadata:nope:not-a-uuid"), None);
    }
}
