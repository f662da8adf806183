pub mod leaderboard;
pub mod pipeline;
pub mod repository;
pub mod repository_sqlx;
pub mod score;
