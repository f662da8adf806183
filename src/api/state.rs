use std::sync::Arc;

use crate::auth::context::AuthContext;
use crate::bid::leaderboard::LeaderboardService;
use crate::bid::pipeline::BidPipeline;
use crate::session::cache::SessionCache;
use crate::session::repository::SessionRepository;
use crate::tasks::session_monitor::SessionMonitor;
use crate::user::repository::UserRepository;

/// Shared handler state. Everything is behind an Arc; cloning per request
/// is cheap.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<BidPipeline>,
    pub leaderboard: Arc<LeaderboardService>,
    pub sessions: Arc<dyn SessionRepository>,
    pub session_cache: Arc<SessionCache>,
    pub users: Arc<dyn UserRepository>,
    pub auth: Arc<AuthContext>,
    pub monitor: Arc<SessionMonitor>,
}
