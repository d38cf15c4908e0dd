//! PostgreSQL session pool backed by deadpool-postgres.

use super::{HeldSession, SessionPool, TargetSession};
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::config::SslMode;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::{debug, info};

/// PostgreSQL target pool implementation.
pub struct PgSessionPool {
    pool: Pool,
}

impl PgSessionPool {
    /// Create a new PostgreSQL session pool and verify connectivity.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("identity-migrate");

        if config.ssl_mode.eq_ignore_ascii_case("prefer") {
            pg_config.ssl_mode(SslMode::Prefer);
        } else {
            pg_config.ssl_mode(SslMode::Disable);
        }

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "initial PostgreSQL connection"))?;

        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionPool for PgSessionPool {
    async fn checkout(&self) -> Result<HeldSession> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "checking out target session"))?;

        debug!("Checked out target session");
        Ok(HeldSession::new(Box::new(PgSession { client })))
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// A pooled PostgreSQL connection. Dropping it returns the connection.
struct PgSession {
    client: Object,
}

#[async_trait]
impl TargetSession for PgSession {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        self.client.batch_execute(sql).await.map_err(|e| {
            debug!("Statement failed: {}", e);
            MigrateError::Target(e)
        })
    }
}
