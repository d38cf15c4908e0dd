//! # identity-migrate
//!
//! Post-load identity column migration for PostgreSQL targets.
//!
//! After rows have been copied into PostgreSQL, tables whose origin schema
//! had an auto-increment column need that column turned into an identity
//! column, and the backing sequence moved past the loaded rows. This library
//! provides:
//!
//! - **Identity DDL** adding `GENERATED BY DEFAULT AS IDENTITY` to each column
//! - **Sequence synchronization** to the column maximum, safe to re-run
//! - **Name mapping** for tables and columns renamed during migration
//! - **Parallel runs** over a bounded set of held target sessions
//!
//! ## Example
//!
//! ```rust,no_run
//! use identity_migrate::{Config, Orchestrator, RunMode, SchemaCatalog};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> identity_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let catalog = SchemaCatalog::load("catalog.yaml")?;
//!     let orchestrator = Orchestrator::new(config, catalog).await?;
//!     let report = orchestrator.run(RunMode::Create, CancellationToken::new()).await?;
//!     println!("Synchronized {} tables", report.tables_synchronized);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod identity;
pub mod naming;
pub mod orchestrator;
pub mod progress;
pub mod target;

// Re-exports for convenient access
pub use crate::core::{Column, SchemaCatalog, SequenceName, Table};
pub use config::{Config, MigrationConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use identity::{IdentityMigrator, IdentityOutcome, IdentityState, SyncOutcome, TableContext};
pub use naming::{ConfigNameResolver, NameResolver, NameSide};
pub use orchestrator::{
    HealthCheckResult, IdentityReport, Orchestrator, PlannedStatement, RunMode, TableReport,
    TableStatus,
};
pub use progress::{LogDestination, ProgressLog, TracingProgressLog};
pub use target::{HeldSession, OfflinePool, PgSessionPool, SessionPool, TargetSession};
