use crate::auth::password::Passwords;
use crate::config::AppConfig;
use crate::db;
use crate::users::{SqliteUserStore, UserStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub passwords: Passwords,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let pool = db::connect(&config).await?;
        db::migrate(&pool).await?;

        let users = Arc::new(SqliteUserStore::new(pool)) as Arc<dyn UserStore>;
        let passwords = Passwords::new(&config.password)?;

        Ok(Self {
            users,
            passwords,
            config,
        })
    }

    pub fn from_parts(
        users: Arc<dyn UserStore>,
        passwords: Passwords,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            users,
            passwords,
            config,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Arc<AppConfig> {
    Arc::new(AppConfig {
        database_url: "sqlite::memory:".into(),
        max_connections: 1,
        host: "127.0.0.1".into(),
        port: 0,
        password: crate::config::PasswordConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
    })
}

/// State over a fresh in-memory database with cheap hashing.
#[cfg(test)]
pub(crate) async fn memory() -> AppState {
    let users = Arc::new(SqliteUserStore::new(db::memory().await)) as Arc<dyn UserStore>;
    AppState::from_parts(users, crate::auth::password::fast(), test_config())
}
