//! Shared handles for commands, the HTTP server and scheduled jobs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::feed::FeedClient;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::tasks::InFlight;
use crate::transport::Transport;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub transport: Transport,
    pub feeds: FeedClient,
    pub in_flight: Arc<InFlight>,
}

impl AppContext {
    /// Open the database (migrating it) and build the shared clients.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = migrate::run_migrations(&config).await?;
        Ok(Self::with_pool(config, pool))
    }

    pub fn with_pool(config: Config, pool: SqlitePool) -> Self {
        let transport = Transport::new(pool.clone(), config.feeds.user_agent.clone());
        let feeds = FeedClient::new(
            transport.clone(),
            Duration::from_secs(config.feeds.timeout_secs),
        );
        Self {
            store: Arc::new(SqliteStore::new(pool.clone())),
            config: Arc::new(config),
            pool,
            transport,
            feeds,
            in_flight: Arc::new(InFlight::default()),
        }
    }
}
