use uuid::Uuid;

/// A registered bidder or admin.
///
/// `weight` is fixed at registration and feeds the scoring formula as the
/// per-user component.
#[derive(Clone, Debug)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub weight: f64,
    pub created_ms: i64,
    pub updated_ms: i64,
}
