use thiserror::Error;

/// Errors the bidding core surfaces to callers.
///
/// Background tasks never return these; they log and back off. Request
/// handlers map each variant to an HTTP status in the API layer.
#[derive(Error, Debug)]
pub enum BidError {
    #[error("bid price must be positive")]
    InvalidPrice,

    #[error("bid must be at least {0}")]
    BelowMinimum(f64),

    #[error("bidding session is not active: {0}")]
    SessionNotActive(String),

    #[error("bidding session not found")]
    SessionNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("{0}")]
    Validation(String),

    #[error("could not validate credentials")]
    Unauthenticated,

    #[error("admin access required")]
    Forbidden,

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BidError {
    /// Wraps a cache or durable-store failure on the request path.
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}
