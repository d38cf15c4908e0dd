//! Configuration validation.

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{MigrateError, Result};
use std::collections::HashSet;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    validate_identifier(&config.target.schema)
        .map_err(|e| MigrateError::Config(format!("target.schema: {}", e)))?;

    match config.target.ssl_mode.to_lowercase().as_str() {
        "disable" | "prefer" => {}
        other => {
            return Err(MigrateError::Config(format!(
                "target.ssl_mode must be disable or prefer (TLS is not supported), got '{}'",
                other
            )))
        }
    }

    // Migration config validation - only check if explicitly set
    if let Some(0) = config.migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.max_pg_connections {
        return Err(MigrateError::Config(
            "migration.max_pg_connections must be at least 1".into(),
        ));
    }

    // Renamed tables must stay distinct, or reverse lookup becomes ambiguous
    let mut targets = HashSet::new();
    for (origin, target) in &config.migration.table_map {
        validate_identifier(target)
            .map_err(|e| MigrateError::Config(format!("table_map.{}: {}", origin, e)))?;
        if !targets.insert(target.as_str()) {
            return Err(MigrateError::Config(format!(
                "table_map maps more than one table to '{}'",
                target
            )));
        }
    }

    for (table, columns) in &config.migration.column_map {
        let mut targets = HashSet::new();
        for (origin, target) in columns {
            validate_identifier(target).map_err(|e| {
                MigrateError::Config(format!("column_map.{}.{}: {}", table, origin, e))
            })?;
            if !targets.insert(target.as_str()) {
                return Err(MigrateError::Config(format!(
                    "column_map.{} maps more than one column to '{}'",
                    table, target
                )));
            }
        }
    }

    Ok(())
}
