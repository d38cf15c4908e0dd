//! Origin/target name resolution for renamed tables and columns.

use crate::config::MigrationConfig;
use std::collections::HashMap;

/// Which naming a resolved name should be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSide {
    /// The name as it exists in the origin store.
    Origin,
    /// The name as it exists in the target database.
    Target,
}

/// Maps possibly-renamed tables and columns between origin and target naming.
///
/// Names with no mapping resolve to themselves.
pub trait NameResolver: Send + Sync {
    /// Express a table name (given in the other naming) in `side` naming.
    fn table_name(&self, name: &str, side: NameSide) -> String;

    /// Express a column name (given in the other naming) in `side` naming.
    ///
    /// Columns are always scoped by the origin table name.
    fn column_name(&self, origin_table: &str, name: &str, side: NameSide) -> String;
}

#[derive(Debug, Clone, Default)]
struct BiMap {
    to_target: HashMap<String, String>,
    to_origin: HashMap<String, String>,
}

impl BiMap {
    fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        let mut map = Self::default();
        for (origin, target) in pairs {
            map.to_target.insert(origin.clone(), target.clone());
            map.to_origin.insert(target.clone(), origin.clone());
        }
        map
    }

    fn resolve(&self, name: &str, side: NameSide) -> String {
        let lookup = match side {
            NameSide::Target => &self.to_target,
            NameSide::Origin => &self.to_origin,
        };
        lookup.get(name).cloned().unwrap_or_else(|| name.to_string())
    }
}

/// Name resolver driven by `migration.table_map` and `migration.column_map`.
#[derive(Debug, Clone, Default)]
pub struct ConfigNameResolver {
    tables: BiMap,
    columns: HashMap<String, BiMap>,
}

impl ConfigNameResolver {
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            tables: BiMap::from_pairs(&config.table_map),
            columns: config
                .column_map
                .iter()
                .map(|(table, cols)| (table.clone(), BiMap::from_pairs(cols)))
                .collect(),
        }
    }
}

impl NameResolver for ConfigNameResolver {
    fn table_name(&self, name: &str, side: NameSide) -> String {
        self.tables.resolve(name, side)
    }

    fn column_name(&self, origin_table: &str, name: &str, side: NameSide) -> String {
        match self.columns.get(origin_table) {
            Some(map) => map.resolve(name, side),
            None => name.to_string(),
        }
    }
}
