//! Schema metadata types for origin tables and columns.
//!
//! These types are populated by the external introspection step and are
//! read-only from the point of view of the identity migration.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name as it exists in the origin store.
    pub name: String,

    /// Origin data type.
    #[serde(default)]
    pub data_type: String,

    /// Whether the column is nullable.
    #[serde(default)]
    pub is_nullable: bool,

    /// Whether the origin store generates this column's value on insert.
    #[serde(default, alias = "is_auto_increment")]
    pub is_identity: bool,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Origin schema name.
    #[serde(default)]
    pub schema: String,

    /// Table name as it exists in the origin store.
    pub name: String,

    /// Column definitions, in ordinal order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        if self.schema.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.schema, self.name)
        }
    }

    /// The auto-increment column, if any.
    ///
    /// Only one column per table is treated as auto-increment. When the metadata
    /// flags several, the first in column order wins and the rest are ignored;
    /// see [`Table::ignored_identity_columns`].
    pub fn identity_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.is_identity)
    }

    /// Flagged columns that lose the first-match tie-break.
    pub fn ignored_identity_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_identity).skip(1)
    }
}

/// On-disk layout of a catalog file.
#[derive(Debug, Deserialize)]
struct CatalogFile {
    tables: Vec<Table>,
}

/// Immutable schema metadata for every table in a run, keyed by origin table name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: Vec<Table>,
    by_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    /// Build a catalog from already-extracted tables.
    ///
    /// Table names must be unique.
    pub fn new(tables: Vec<Table>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(tables.len());
        for (idx, table) in tables.iter().enumerate() {
            if table.name.is_empty() {
                return Err(MigrateError::SchemaCatalog(format!(
                    "table #{} has an empty name",
                    idx + 1
                )));
            }
            if by_name.insert(table.name.clone(), idx).is_some() {
                return Err(MigrateError::SchemaCatalog(format!(
                    "table '{}' is listed more than once",
                    table.name
                )));
            }
        }
        Ok(Self { tables, by_name })
    }

    /// Load a catalog from a YAML file with a top-level `tables` list.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a catalog from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: CatalogFile = serde_yaml::from_str(yaml)
            .map_err(|e| MigrateError::SchemaCatalog(e.to_string()))?;
        Self::new(file.tables)
    }

    /// Look up a table by origin name.
    pub fn get(&self, origin_name: &str) -> Option<&Table> {
        self.by_name.get(origin_name).map(|&idx| &self.tables[idx])
    }

    /// All tables, in catalog order.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
