//! PostgreSQL target sessions.
//!
//! Statements are executed on sessions checked out from a [`SessionPool`].
//! A checked-out session is a [`HeldSession`]: it is owned by exactly one
//! task and goes back to the pool when it is dropped, so every exit path of a
//! caller releases it exactly once.

mod postgres;

pub use postgres::PgSessionPool;

use crate::error::{MigrateError, Result};
use async_trait::async_trait;
use tracing::debug;

/// A single database connection able to run statements.
#[async_trait]
pub trait TargetSession: Send {
    /// Execute one SQL statement, discarding any rows it returns.
    ///
    /// A failed statement leaves the session usable; the error is returned
    /// to the caller and never aborts the process.
    async fn execute(&mut self, sql: &str) -> Result<()>;
}

/// Trait for target session pools.
#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Check out a session for exclusive use.
    async fn checkout(&self) -> Result<HeldSession>;

    /// Get the database type.
    fn db_type(&self) -> &str;
}

/// A checked-out session, released when dropped.
pub struct HeldSession {
    session: Box<dyn TargetSession>,
}

impl HeldSession {
    pub fn new(session: Box<dyn TargetSession>) -> Self {
        Self { session }
    }

    /// Execute a statement on this session.
    pub async fn execute(&mut self, sql: &str) -> Result<()> {
        self.session.execute(sql).await
    }

    /// Return the session to its pool.
    pub fn release(self) {}
}

impl Drop for HeldSession {
    fn drop(&mut self) {
        debug!("Released target session");
    }
}

/// Pool for runs that only build statements. Every checkout fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflinePool;

#[async_trait]
impl SessionPool for OfflinePool {
    async fn checkout(&self) -> Result<HeldSession> {
        Err(MigrateError::pool("no target connection", "offline session pool"))
    }

    fn db_type(&self) -> &str {
        "offline"
    }
}
