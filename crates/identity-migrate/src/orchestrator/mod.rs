//! Identity orchestrator - runs the identity step for every catalog table.

use crate::config::Config;
use crate::core::schema::{SchemaCatalog, Table};
use crate::error::{MigrateError, Result};
use crate::identity::{IdentityMigrator, IdentityOutcome, IdentityState, SyncOutcome, TableContext};
use crate::naming::{ConfigNameResolver, NameResolver, NameSide};
use crate::progress::{LogDestination, ProgressLog, TracingProgressLog};
use crate::target::{OfflinePool, PgSessionPool, SessionPool};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Which identity operation a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Add identity to each auto-increment column, then synchronize its sequence.
    Create,
    /// Only synchronize existing sequences.
    Resync,
}

/// Per-table status in a run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Synchronized,
    Skipped,
    DdlFailed,
    SyncFailed,
    /// The table's task panicked; its identity state is unknown.
    Panicked,
    Cancelled,
}

impl TableStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, TableStatus::DdlFailed | TableStatus::SyncFailed | TableStatus::Panicked)
    }
}

/// Outcome of one table in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    /// Table name in the origin store.
    pub origin_table: String,

    /// Table name in the target database.
    pub table: String,

    pub status: TableStatus,

    /// Identity state after a `create` run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IdentityState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an identity run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityReport {
    /// Unique run identifier.
    pub run_id: String,

    pub mode: RunMode,

    /// Final status: completed, completed_with_failures or cancelled.
    pub status: String,

    /// Hash of the configuration used for the run.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub duration_seconds: f64,

    pub tables_total: usize,

    pub tables_synchronized: usize,

    pub tables_skipped: usize,

    pub tables_failed: usize,

    pub tables: Vec<TableReport>,
}

impl IdentityReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Tables whose identity step failed.
    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status.is_failure())
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == "cancelled"
    }
}

/// A statement a run would issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStatement {
    pub table: String,
    pub sql: String,
}

/// Target connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Identity orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<SchemaCatalog>,
    pool: Arc<dyn SessionPool>,
    resolver: Arc<dyn NameResolver>,
    migrator: Arc<IdentityMigrator>,
}

impl Orchestrator {
    /// Create an orchestrator connected to the configured target.
    pub async fn new(config: Config, catalog: SchemaCatalog) -> Result<Self> {
        let max_conns = config.migration.get_max_pg_connections();
        let pool = PgSessionPool::new(&config.target, max_conns).await?;
        let resolver = ConfigNameResolver::from_config(&config.migration);

        Ok(Self::with_parts(
            config,
            catalog,
            Arc::new(pool),
            Arc::new(resolver),
            Arc::new(TracingProgressLog),
        ))
    }

    /// Create an orchestrator that never connects, for [`plan`](Self::plan).
    ///
    /// `run` reports every table with an identity column as failed and
    /// `health_check` reports unhealthy.
    pub fn offline(config: Config, catalog: SchemaCatalog) -> Self {
        let resolver = ConfigNameResolver::from_config(&config.migration);
        Self::with_parts(
            config,
            catalog,
            Arc::new(OfflinePool),
            Arc::new(resolver),
            Arc::new(TracingProgressLog),
        )
    }

    /// Create an orchestrator from explicit collaborators.
    pub fn with_parts(
        config: Config,
        catalog: SchemaCatalog,
        pool: Arc<dyn SessionPool>,
        resolver: Arc<dyn NameResolver>,
        progress: Arc<dyn ProgressLog>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let migrator = Arc::new(IdentityMigrator::new(
            pool.clone(),
            resolver.clone(),
            progress,
            catalog.clone(),
            config.target.schema.clone(),
        ));

        Self {
            config,
            catalog,
            pool,
            resolver,
            migrator,
        }
    }

    /// Catalog tables passing the include/exclude filters, in catalog order.
    pub fn tables(&self) -> Vec<&Table> {
        self.catalog
            .tables()
            .iter()
            .filter(|t| self.config.migration.includes_table(&t.name))
            .collect()
    }

    /// Build the per-table context for an origin table.
    pub fn context_for(&self, table: &Table) -> TableContext {
        let name = self.resolver.table_name(&table.name, NameSide::Target);
        let destination = match &self.config.migration.log_dir {
            Some(dir) => LogDestination::File(log_path(dir, &name)),
            None => LogDestination::Console,
        };
        TableContext::new(name).with_log_destination(destination)
    }

    /// Run the identity step for every selected table.
    ///
    /// Per-table failures are recorded in the report and never abort the run.
    pub async fn run(&self, mode: RunMode, cancel: CancellationToken) -> Result<IdentityReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let tables = self.tables();
        let workers = self.config.migration.get_workers().max(1);

        info!(
            "Starting identity run {} ({:?}, {} tables, {} workers, target {})",
            run_id,
            mode,
            tables.len(),
            workers,
            self.pool.db_type()
        );

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut handles = Vec::new();
        let mut slots: Vec<Option<TableReport>> = vec![None; tables.len()];
        let mut cancelled = false;

        for (idx, table) in tables.into_iter().enumerate() {
            warn_ignored_identity_columns(table);
            let ctx = self.context_for(table);

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    slots[idx] = Some(cancelled_report(&table.name, &ctx.name));
                    continue;
                }
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|e| MigrateError::pool(e.to_string(), "identity worker semaphore"))?,
            };

            let migrator = self.migrator.clone();
            let origin_table = table.name.clone();
            let target_table = ctx.name.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                match mode {
                    RunMode::Create => {
                        create_report(origin_table, &ctx, migrator.create_identity(&ctx).await)
                    }
                    RunMode::Resync => {
                        sync_report(origin_table, &ctx, migrator.synchronize_sequence(&ctx).await)
                    }
                }
            });
            handles.push((idx, table.name.clone(), target_table, handle));
        }

        for (idx, origin_table, table, handle) in handles {
            slots[idx] = Some(match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!("{}: identity task panicked - {}", table, e);
                    TableReport {
                        origin_table,
                        table,
                        status: TableStatus::Panicked,
                        state: None,
                        sequence: None,
                        error: Some(format!("Task panicked: {}", e)),
                    }
                }
            });
        }
        let reports: Vec<TableReport> = slots.into_iter().flatten().collect();

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

        let count = |status: TableStatus| reports.iter().filter(|r| r.status == status).count();
        let tables_synchronized = count(TableStatus::Synchronized);
        let tables_skipped = count(TableStatus::Skipped);
        let tables_failed = reports.iter().filter(|r| r.status.is_failure()).count();

        let status = if cancelled {
            "cancelled"
        } else if tables_failed > 0 {
            "completed_with_failures"
        } else {
            "completed"
        };

        info!(
            "Identity run {} {}: {} synchronized, {} skipped, {} failed",
            run_id, status, tables_synchronized, tables_skipped, tables_failed
        );

        Ok(IdentityReport {
            run_id,
            mode,
            status: status.to_string(),
            config_hash: self.config.hash(),
            started_at,
            completed_at,
            duration_seconds: duration,
            tables_total: reports.len(),
            tables_synchronized,
            tables_skipped,
            tables_failed,
            tables: reports,
        })
    }

    /// Statements a run would issue, without touching the database.
    pub fn plan(&self, mode: RunMode) -> Result<Vec<PlannedStatement>> {
        let schema = self.migrator.schema();
        let mut planned = Vec::new();

        for table in self.tables() {
            warn_ignored_identity_columns(table);
            let ctx = self.context_for(table);
            let target = match self.migrator.resolve(&ctx) {
                Some(target) => target,
                None => {
                    debug!("{}: no auto-increment column", table.name);
                    continue;
                }
            };

            if mode == RunMode::Create {
                planned.push(PlannedStatement {
                    table: ctx.name.clone(),
                    sql: target.add_identity_sql(schema)?,
                });
            }
            planned.push(PlannedStatement {
                table: ctx.name.clone(),
                sql: target.setval_sql(schema)?,
            });
        }

        Ok(planned)
    }

    /// Check target connectivity.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = match self.pool.checkout().await {
            Ok(mut session) => session.execute("SELECT 1").await,
            Err(e) => Err(e),
        };
        let target_latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => HealthCheckResult {
                target_connected: true,
                target_latency_ms,
                target_error: None,
                healthy: true,
            },
            Err(e) => HealthCheckResult {
                target_connected: false,
                target_latency_ms,
                target_error: Some(e.to_string()),
                healthy: false,
            },
        }
    }
}

fn warn_ignored_identity_columns(table: &Table) {
    for col in table.ignored_identity_columns() {
        warn!(
            "{}: ignoring additional auto-increment column '{}'",
            table.full_name(),
            col.name
        );
    }
}

/// Per-table progress file inside `dir`. Path separators in the table name
/// are replaced so the file never lands outside `dir`.
fn log_path(dir: &Path, table: &str) -> PathBuf {
    let file_name: String = table
        .chars()
        .map(|c| {
            if std::path::is_separator(c) || c == '\0' {
                '_'
            } else {
                c
            }
        })
        .collect();
    dir.join(format!("{}.log", file_name))
}

fn cancelled_report(origin_table: &str, table: &str) -> TableReport {
    TableReport {
        origin_table: origin_table.to_string(),
        table: table.to_string(),
        status: TableStatus::Cancelled,
        state: None,
        sequence: None,
        error: None,
    }
}

fn create_report(
    origin_table: String,
    ctx: &TableContext,
    outcome: IdentityOutcome,
) -> TableReport {
    let state = outcome.state();
    let (status, sequence, error) = match outcome {
        IdentityOutcome::Skipped => (TableStatus::Skipped, None, None),
        IdentityOutcome::Synchronized { sequence, .. } => {
            (TableStatus::Synchronized, Some(sequence), None)
        }
        IdentityOutcome::DdlFailed(e) => (TableStatus::DdlFailed, None, Some(e.to_string())),
        IdentityOutcome::SyncFailed(e) => (TableStatus::SyncFailed, None, Some(e.to_string())),
    };

    TableReport {
        origin_table,
        table: ctx.name.clone(),
        status,
        state,
        sequence,
        error,
    }
}

fn sync_report(origin_table: String, ctx: &TableContext, outcome: SyncOutcome) -> TableReport {
    let (status, sequence, error) = match outcome {
        SyncOutcome::Skipped => (TableStatus::Skipped, None, None),
        SyncOutcome::Synchronized { sequence } => {
            (TableStatus::Synchronized, Some(sequence), None)
        }
        SyncOutcome::Failed(e) => (TableStatus::SyncFailed, None, Some(e.to_string())),
    };

    TableReport {
        origin_table,
        table: ctx.name.clone(),
        status,
        state: None,
        sequence,
        error,
    }
}
