pub mod schema;

use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    pub async fn connect(cfg: &AppConfig) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(cfg.db_max_connections)
            .acquire_timeout(cfg.db_acquire_timeout)
            .max_lifetime(cfg.db_max_lifetime)
            .connect(&cfg.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}
