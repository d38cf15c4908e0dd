//! Auto-increment to identity column migration.
//!
//! Two operations run once a table's rows have been loaded:
//!
//! - [`IdentityMigrator::create_identity`] turns the table's auto-increment
//!   column into a `GENERATED BY DEFAULT AS IDENTITY` column and moves the new
//!   backing sequence to the column maximum, both on one held session.
//! - [`IdentityMigrator::synchronize_sequence`] only moves an existing
//!   sequence. It is safe to re-run as a repair step.
//!
//! Neither operation returns an error. Failures are reported as outcome
//! values so that one table's problem never stops the rest of a migration.

pub mod sql;

use crate::core::identifier::{qualify_pg, quote_pg, sequence_name, SequenceName};
use crate::core::schema::SchemaCatalog;
use crate::error::{MigrateError, Result};
use crate::naming::{NameResolver, NameSide};
use crate::progress::{LogDestination, ProgressLog};
use crate::target::SessionPool;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Per-table input to the identity operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableContext {
    /// Table name in the target database.
    pub name: String,
    /// Where progress lines for this table go.
    pub log_destination: LogDestination,
}

impl TableContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            log_destination: LogDestination::Console,
        }
    }

    pub fn with_log_destination(mut self, destination: LogDestination) -> Self {
        self.log_destination = destination;
        self
    }
}

/// Identity progress of a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    /// The column is still a plain column.
    NoIdentity,
    /// The identity DDL succeeded but the sequence was not synchronized.
    IdentityAdded,
    /// Identity added and sequence synchronized.
    Synchronized,
}

/// Result of [`IdentityMigrator::synchronize_sequence`].
#[derive(Debug)]
pub enum SyncOutcome {
    /// The table has no auto-increment column; nothing was issued.
    Skipped,
    /// The sequence now continues from the column maximum.
    Synchronized { sequence: String },
    /// The statement (or session checkout) failed.
    Failed(MigrateError),
}

/// Result of [`IdentityMigrator::create_identity`].
#[derive(Debug)]
pub enum IdentityOutcome {
    /// The table has no auto-increment column; nothing was issued.
    Skipped,
    /// Identity added and sequence synchronized.
    Synchronized {
        column: String,
        sequence: String,
    },
    /// The identity DDL failed; the sync statement was not issued.
    DdlFailed(MigrateError),
    /// The identity DDL succeeded but the sync statement failed.
    /// The identity is kept.
    SyncFailed(MigrateError),
}

impl IdentityOutcome {
    /// Table state after the operation, `None` when skipped.
    pub fn state(&self) -> Option<IdentityState> {
        match self {
            IdentityOutcome::Skipped => None,
            IdentityOutcome::Synchronized { .. } => Some(IdentityState::Synchronized),
            IdentityOutcome::DdlFailed(_) => Some(IdentityState::NoIdentity),
            IdentityOutcome::SyncFailed(_) => Some(IdentityState::IdentityAdded),
        }
    }
}

/// Resolved names for a table's auto-increment column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityTarget {
    /// Table name in the origin store.
    pub origin_table: String,
    /// Table name in the target database.
    pub table: String,
    /// Column name in the origin store.
    pub origin_column: String,
    /// Column name in the target database.
    pub column: String,
    /// Sequence backing the identity column.
    pub sequence: SequenceName,
}

impl IdentityTarget {
    /// `ALTER TABLE` statement adding the identity.
    pub fn add_identity_sql(&self, schema: &str) -> Result<String> {
        sql::add_identity_sql(schema, &self.table, &self.column, &self.sequence)
    }

    /// `SETVAL` statement synchronizing the sequence.
    pub fn setval_sql(&self, schema: &str) -> Result<String> {
        sql::setval_sql(schema, &self.table, &self.column, &self.sequence)
    }
}

/// Runs the identity operations against a target schema.
pub struct IdentityMigrator {
    pool: Arc<dyn SessionPool>,
    resolver: Arc<dyn NameResolver>,
    progress: Arc<dyn ProgressLog>,
    catalog: Arc<SchemaCatalog>,
    schema: String,
}

impl IdentityMigrator {
    pub fn new(
        pool: Arc<dyn SessionPool>,
        resolver: Arc<dyn NameResolver>,
        progress: Arc<dyn ProgressLog>,
        catalog: Arc<SchemaCatalog>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            resolver,
            progress,
            catalog,
            schema: schema.into(),
        }
    }

    /// Target schema.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Resolve the auto-increment column of a table.
    ///
    /// Returns `None` when the table is unknown to the catalog or has no
    /// auto-increment column.
    pub fn resolve(&self, ctx: &TableContext) -> Option<IdentityTarget> {
        let origin_table = self.resolver.table_name(&ctx.name, NameSide::Origin);
        let table = match self.catalog.get(&origin_table) {
            Some(table) => table,
            None => {
                debug!("No metadata for table {} (origin {})", ctx.name, origin_table);
                return None;
            }
        };

        let column = table.identity_column()?;
        let target_column = self
            .resolver
            .column_name(&origin_table, &column.name, NameSide::Target);
        let sequence = sequence_name(&ctx.name, &target_column);

        Some(IdentityTarget {
            origin_table,
            table: ctx.name.clone(),
            origin_column: column.name.clone(),
            column: target_column,
            sequence,
        })
    }

    /// Move the table's sequence so the next generated value continues from the
    /// column maximum.
    ///
    /// Failures are returned as [`SyncOutcome::Failed`] without a progress line.
    pub async fn synchronize_sequence(&self, ctx: &TableContext) -> SyncOutcome {
        let target = match self.resolve(ctx) {
            Some(target) => target,
            None => return SyncOutcome::Skipped,
        };

        let statements = match self.statements(&target) {
            Ok(statements) => statements,
            Err(e) => return SyncOutcome::Failed(e),
        };

        let mut session = match self.pool.checkout().await {
            Ok(session) => session,
            Err(e) => return SyncOutcome::Failed(e),
        };
        let result = session.execute(&statements.setval).await;
        session.release();

        if let Err(e) = result {
            return SyncOutcome::Failed(MigrateError::sequence_sync(
                statements.qualified_sequence,
                e.to_string(),
            ));
        }

        self.progress
            .log(
                &format!("Synchronized sequence {}", statements.qualified_sequence),
                &ctx.log_destination,
            )
            .await;

        SyncOutcome::Synchronized {
            sequence: target.sequence.to_string(),
        }
    }

    /// Turn the table's auto-increment column into an identity column, then
    /// synchronize its new sequence on the same session.
    ///
    /// Running this twice fails at the DDL step; use
    /// [`synchronize_sequence`](Self::synchronize_sequence) to re-sync.
    pub async fn create_identity(&self, ctx: &TableContext) -> IdentityOutcome {
        let target = match self.resolve(ctx) {
            Some(target) => target,
            None => return IdentityOutcome::Skipped,
        };

        let statements = match self.statements(&target) {
            Ok(statements) => statements,
            Err(e) => return IdentityOutcome::DdlFailed(e),
        };

        let mut session = match self.pool.checkout().await {
            Ok(session) => session,
            Err(e) => return IdentityOutcome::DdlFailed(e),
        };

        // Dropping the session on either early return releases it.
        if let Err(e) = session.execute(&statements.add_identity).await {
            return IdentityOutcome::DdlFailed(MigrateError::ddl(
                statements.qualified_table,
                e.to_string(),
            ));
        }
        if let Err(e) = session.execute(&statements.setval).await {
            return IdentityOutcome::SyncFailed(MigrateError::sequence_sync(
                statements.qualified_sequence,
                e.to_string(),
            ));
        }
        session.release();

        self.progress
            .log(
                &format!(
                    "Added identity to column {}.{}",
                    statements.qualified_table, statements.quoted_column
                ),
                &ctx.log_destination,
            )
            .await;

        IdentityOutcome::Synchronized {
            column: target.column,
            sequence: target.sequence.to_string(),
        }
    }

    /// Build every statement and display name up front, so an invalid
    /// identifier fails before a session is checked out.
    fn statements(&self, target: &IdentityTarget) -> Result<Statements> {
        Ok(Statements {
            add_identity: target.add_identity_sql(&self.schema)?,
            setval: target.setval_sql(&self.schema)?,
            qualified_table: qualify_pg(&self.schema, &target.table)?,
            quoted_column: quote_pg(&target.column)?,
            qualified_sequence: target.sequence.qualified(&self.schema)?,
        })
    }
}

struct Statements {
    add_identity: String,
    setval: String,
    qualified_table: String,
    quoted_column: String,
    qualified_sequence: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::core::schema::{Column, Table};
    use crate::naming::ConfigNameResolver;
    use crate::progress::testing::MemoryProgressLog;
    use crate::target::testing::MockPool;

    fn col(name: &str, is_identity: bool) -> Column {
        Column {
            name: name.to_string(),
            data_type: "int".to_string(),
            is_nullable: false,
            is_identity,
        }
    }

    fn catalog() -> Arc<SchemaCatalog> {
        Arc::new(
            SchemaCatalog::new(vec![
                Table {
                    schema: "dbo".into(),
                    name: "Orders".into(),
                    columns: vec![col("id", true), col("total", false)],
                },
                Table {
                    schema: "dbo".into(),
                    name: "logs".into(),
                    columns: vec![col("id", true), col("message", false)],
                },
                Table {
                    schema: "dbo".into(),
                    name: "tags".into(),
                    columns: vec![col("name", false)],
                },
                Table {
                    schema: "dbo".into(),
                    name: "events".into(),
                    columns: vec![col("event_id", true), col("seq_no", true)],
                },
            ])
            .unwrap(),
        )
    }

    fn resolver() -> Arc<ConfigNameResolver> {
        let mut config = MigrationConfig::default();
        config.table_map.insert("Orders".into(), "orders".into());
        config
            .column_map
            .entry("Orders".into())
            .or_default()
            .insert("id".into(), "order_id".into());
        Arc::new(ConfigNameResolver::from_config(&config))
    }

    fn migrator(pool: Arc<MockPool>, log: Arc<MemoryProgressLog>) -> IdentityMigrator {
        IdentityMigrator::new(pool, resolver(), log, catalog(), "public")
    }

    fn setup(pool: MockPool) -> (Arc<MockPool>, Arc<MemoryProgressLog>, IdentityMigrator) {
        let pool = Arc::new(pool);
        let log = Arc::new(MemoryProgressLog::default());
        let m = migrator(pool.clone(), log.clone());
        (pool, log, m)
    }

    #[test]
    fn test_resolve_renamed_table_and_column() {
        let (_, _, m) = setup(MockPool::new());
        let target = m.resolve(&TableContext::new("orders")).unwrap();
        assert_eq!(target.origin_table, "Orders");
        assert_eq!(target.origin_column, "id");
        assert_eq!(target.column, "order_id");
        assert_eq!(target.sequence.as_str(), "orders_order_id_seq");
    }

    #[test]
    fn test_resolve_first_flagged_column_wins() {
        let (_, _, m) = setup(MockPool::new());
        let target = m.resolve(&TableContext::new("events")).unwrap();
        assert_eq!(target.column, "event_id");
    }

    #[test]
    fn test_resolve_unknown_table() {
        let (_, _, m) = setup(MockPool::new());
        assert!(m.resolve(&TableContext::new("missing")).is_none());
    }

    #[tokio::test]
    async fn test_no_identity_column_is_noop() {
        let (pool, log, m) = setup(MockPool::new());
        let ctx = TableContext::new("tags");

        assert!(matches!(m.synchronize_sequence(&ctx).await, SyncOutcome::Skipped));
        let outcome = m.create_identity(&ctx).await;
        assert!(matches!(outcome, IdentityOutcome::Skipped));
        assert_eq!(outcome.state(), None);

        assert!(pool.recorder.statements().is_empty());
        assert_eq!(pool.recorder.checkouts(), 0);
        assert!(log.messages().is_empty());
    }

    #[tokio::test]
    async fn test_create_identity_renamed_scenario() {
        let (pool, log, m) = setup(MockPool::new());
        let outcome = m.create_identity(&TableContext::new("orders")).await;

        match &outcome {
            IdentityOutcome::Synchronized { column, sequence } => {
                assert_eq!(column, "order_id");
                assert_eq!(sequence, "orders_order_id_seq");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(outcome.state(), Some(IdentityState::Synchronized));

        let statements = pool.recorder.statements();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"public\".\"orders\" ALTER COLUMN \"order_id\" ADD GENERATED BY DEFAULT AS IDENTITY;".to_string(),
                "SELECT SETVAL('\"public\".\"orders_order_id_seq\"', GREATEST(COALESCE((SELECT MAX(\"order_id\") FROM \"public\".\"orders\"), 0), 1), false);".to_string(),
            ]
        );

        // One session for both statements
        assert_eq!(pool.recorder.checkouts(), 1);
        assert_eq!(pool.recorder.releases(), 1);

        assert_eq!(
            log.messages(),
            vec!["Added identity to column \"public\".\"orders\".\"order_id\"".to_string()]
        );
    }

    #[tokio::test]
    async fn test_empty_table_syncs_to_one() {
        let (pool, log, m) = setup(MockPool::new());
        let outcome = m.synchronize_sequence(&TableContext::new("logs")).await;

        assert!(matches!(outcome, SyncOutcome::Synchronized { ref sequence } if sequence == "logs_id_seq"));
        let statements = pool.recorder.statements();
        assert_eq!(statements.len(), 1);
        // An empty table has MAX() = NULL, which falls through to 1 with is_called = false
        assert!(statements[0].contains("GREATEST(COALESCE((SELECT MAX(\"id\") FROM \"public\".\"logs\"), 0), 1), false)"));
        assert_eq!(
            log.messages(),
            vec!["Synchronized sequence \"public\".\"logs_id_seq\"".to_string()]
        );
        assert_eq!(pool.recorder.releases(), 1);
    }

    #[tokio::test]
    async fn test_ddl_failure_skips_sync_and_releases_once() {
        let (pool, log, m) = setup(MockPool::failing_on("ALTER TABLE"));
        let outcome = m.create_identity(&TableContext::new("orders")).await;

        assert!(matches!(outcome, IdentityOutcome::DdlFailed(MigrateError::Ddl { .. })));
        assert_eq!(outcome.state(), Some(IdentityState::NoIdentity));

        let statements = pool.recorder.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("ALTER TABLE"));
        assert_eq!(pool.recorder.checkouts(), 1);
        assert_eq!(pool.recorder.releases(), 1);
        assert!(log.messages().is_empty());
    }

    #[tokio::test]
    async fn test_sync_failure_after_ddl_releases_once() {
        let (pool, log, m) = setup(MockPool::failing_on("SETVAL"));
        let outcome = m.create_identity(&TableContext::new("orders")).await;

        assert!(matches!(
            outcome,
            IdentityOutcome::SyncFailed(MigrateError::SequenceSync { .. })
        ));
        assert_eq!(outcome.state(), Some(IdentityState::IdentityAdded));

        // DDL issued and not followed by any compensating statement
        let statements = pool.recorder.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("ALTER TABLE"));
        assert!(statements[1].starts_with("SELECT SETVAL"));
        assert_eq!(pool.recorder.releases(), 1);
        assert!(log.messages().is_empty());
    }

    #[tokio::test]
    async fn test_sync_failure_is_silent() {
        let (pool, log, m) = setup(MockPool::failing_on("SETVAL"));
        let outcome = m.synchronize_sequence(&TableContext::new("logs")).await;

        match outcome {
            SyncOutcome::Failed(MigrateError::SequenceSync { sequence, .. }) => {
                assert_eq!(sequence, "\"public\".\"logs_id_seq\"");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(log.messages().is_empty());
        assert_eq!(pool.recorder.releases(), 1);
    }

    #[tokio::test]
    async fn test_checkout_failure_issues_nothing() {
        let mut pool = MockPool::new();
        pool.fail_checkout = true;
        let (pool, log, m) = setup(pool);

        assert!(matches!(
            m.synchronize_sequence(&TableContext::new("logs")).await,
            SyncOutcome::Failed(MigrateError::Pool { .. })
        ));
        assert!(matches!(
            m.create_identity(&TableContext::new("logs")).await,
            IdentityOutcome::DdlFailed(MigrateError::Pool { .. })
        ));
        assert!(pool.recorder.statements().is_empty());
        assert!(log.messages().is_empty());
    }

    #[tokio::test]
    async fn test_resync_is_repeatable() {
        let (pool, log, m) = setup(MockPool::new());
        let ctx = TableContext::new("orders");

        for _ in 0..3 {
            assert!(matches!(
                m.synchronize_sequence(&ctx).await,
                SyncOutcome::Synchronized { .. }
            ));
        }
        let statements = pool.recorder.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s == &statements[0]));
        assert_eq!(pool.recorder.checkouts(), 3);
        assert_eq!(pool.recorder.releases(), 3);
        assert_eq!(log.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_progress_goes_to_table_destination() {
        let (_, log, m) = setup(MockPool::new());
        let dest = LogDestination::File("logs/orders.log".into());
        let ctx = TableContext::new("orders").with_log_destination(dest.clone());

        m.create_identity(&ctx).await;
        let lines = log.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].1, dest);
    }
}
