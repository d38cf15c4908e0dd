//! Statements issued for identity columns.

use crate::core::identifier::{qualify_pg, quote_literal, quote_pg, SequenceName};
use crate::error::Result;

/// `ALTER TABLE .. ADD GENERATED BY DEFAULT AS IDENTITY` for a column.
///
/// A shortened sequence name is spelled out, otherwise PostgreSQL would pick
/// its own name for the backing sequence.
pub fn add_identity_sql(
    schema: &str,
    table: &str,
    column: &str,
    sequence: &SequenceName,
) -> Result<String> {
    let options = if sequence.is_truncated() {
        format!(" (SEQUENCE NAME {})", sequence.qualified(schema)?)
    } else {
        String::new()
    };

    Ok(format!(
        "ALTER TABLE {} ALTER COLUMN {} ADD GENERATED BY DEFAULT AS IDENTITY{};",
        qualify_pg(schema, table)?,
        quote_pg(column)?,
        options
    ))
}

/// `SETVAL` moving a sequence to the column maximum.
///
/// The value is `GREATEST(COALESCE(MAX(column), 0), 1)` with `is_called = false`,
/// so the next `nextval` returns exactly that value. An empty table yields 1.
pub fn setval_sql(
    schema: &str,
    table: &str,
    column: &str,
    sequence: &SequenceName,
) -> Result<String> {
    Ok(format!(
        "SELECT SETVAL({}, GREATEST(COALESCE((SELECT MAX({}) FROM {}), 0), 1), false);",
        quote_literal(&sequence.qualified(schema)?),
        quote_pg(column)?,
        qualify_pg(schema, table)?
    ))
}
