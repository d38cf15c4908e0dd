//! Identifier validation, quoting and sequence name synthesis.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed as
//! parameters in prepared statements - only data values can be parameterized.
//! Every statement this crate issues is therefore built from quoted identifiers:
//!
//! 1. Validate identifiers for suspicious patterns (null bytes, excessive length)
//! 2. Wrap in double quotes, doubling any embedded double quote
//!
//! Sequence names are synthesized rather than taken from metadata, so they are
//! bounded to the PostgreSQL identifier limit by construction.

use crate::error::{MigrateError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Maximum PostgreSQL identifier length in bytes (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Suffix PostgreSQL itself uses for the sequences backing serial and identity columns.
const SEQUENCE_SUFFIX: &str = "_seq";

/// Hex digits of the candidate digest kept in a shortened name.
const HASH_FRAGMENT_LEN: usize = 8;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length (PostgreSQL would silently truncate them)
///
/// # Errors
///
/// Returns `MigrateError::Config` for invalid identifiers with a descriptive message.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(quote_pg("users")?, "\"users\"");
/// assert_eq!(quote_pg("table\"name")?, "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL object name with schema.
///
/// Returns `"schema"."object"` with proper quoting.
pub fn qualify_pg(schema: &str, object: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(object)?))
}

/// Quote a string as a SQL literal, doubling single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Name of the sequence backing an identity column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceName {
    name: String,
    truncated: bool,
}

impl SequenceName {
    /// The sequence name, unquoted.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether the `<table>_<column>_seq` candidate had to be shortened.
    ///
    /// A shortened name differs from the one PostgreSQL would pick on its own,
    /// so it has to be spelled out in the identity DDL.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// `"schema"."sequence"` form.
    pub fn qualified(&self, schema: &str) -> Result<String> {
        qualify_pg(schema, &self.name)
    }
}

impl fmt::Display for SequenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Synthesize the sequence name for a table/column pair.
///
/// The candidate is `<table>_<column>_seq`. When it exceeds
/// [`MAX_IDENTIFIER_LENGTH`] bytes it becomes `<prefix>_<hash>_seq`, where
/// `hash` is the first 8 hex digits of the SHA-256 digest of the full candidate
/// and `prefix` is the longest leading part of `<table>_<column>` that fits.
/// The result depends only on the inputs.
pub fn sequence_name(table: &str, column: &str) -> SequenceName {
    let candidate = format!("{}_{}{}", table, column, SEQUENCE_SUFFIX);
    if candidate.len() <= MAX_IDENTIFIER_LENGTH {
        return SequenceName {
            name: candidate,
            truncated: false,
        };
    }

    let digest = Sha256::digest(candidate.as_bytes());
    let hash = format!("{:x}", digest);
    let fragment = &hash[..HASH_FRAGMENT_LEN];

    // "_" + fragment + "_seq"
    let budget = MAX_IDENTIFIER_LENGTH - 1 - HASH_FRAGMENT_LEN - SEQUENCE_SUFFIX.len();
    let stem = &candidate[..candidate.len() - SEQUENCE_SUFFIX.len()];
    let prefix = &stem[..floor_char_boundary(stem, budget)];

    SequenceName {
        name: format!("{}_{}{}", prefix, fragment, SEQUENCE_SUFFIX),
        truncated: true,
    }
}

/// Largest byte index `<= max` that lies on a char boundary of `s`.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut idx = max;
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("my_table").is_ok());
        assert!(validate_identifier("Table123").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long_name = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        let result = validate_identifier(&long_name);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_validate_identifier_accepts_max_length() {
        let max_name = "a".repeat(MAX_IDENTIFIER_LENGTH);
        assert!(validate_identifier(&max_name).is_ok());
    }

    // =========================================================================
    // Quoting tests
    // =========================================================================

    #[test]
    fn test_quote_pg_escapes_double_quote() {
        assert_eq!(quote_pg("users").unwrap(), "\"users\"");
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
    }

    #[test]
    fn test_quote_pg_sql_injection_safely_quoted() {
        let result = quote_pg("Robert'); DROP TABLE Students;--");
        assert_eq!(result.unwrap(), "\"Robert'); DROP TABLE Students;--\"");
    }

    #[test]
    fn test_qualify_pg() {
        assert_eq!(
            qualify_pg("public", "users").unwrap(),
            "\"public\".\"users\""
        );
        assert!(qualify_pg("", "users").is_err());
        assert!(qualify_pg("public", "table\0name").is_err());
    }

    #[test]
    fn test_quote_literal_doubles_single_quotes() {
        assert_eq!(quote_literal("\"s\".\"o'k\""), "'\"s\".\"o''k\"'");
    }

    // =========================================================================
    // Sequence name tests
    // =========================================================================

    #[test]
    fn test_sequence_name_short() {
        let seq = sequence_name("orders", "order_id");
        assert_eq!(seq.as_str(), "orders_order_id_seq");
        assert!(!seq.is_truncated());
    }

    #[test]
    fn test_sequence_name_exactly_at_limit_is_kept() {
        // 54 + 1 + 4 + 4 = 63
        let table = "t".repeat(54);
        let seq = sequence_name(&table, "abcd");
        assert_eq!(seq.as_str().len(), MAX_IDENTIFIER_LENGTH);
        assert!(!seq.is_truncated());
    }

    #[test]
    fn test_sequence_name_is_deterministic() {
        let table = "a".repeat(60);
        let column = "b".repeat(60);
        assert_eq!(sequence_name(&table, &column), sequence_name(&table, &column));
        assert_eq!(sequence_name("logs", "id"), sequence_name("logs", "id"));
    }

    #[test]
    fn test_sequence_name_maximal_inputs_fit() {
        let table = "x".repeat(MAX_IDENTIFIER_LENGTH);
        let column = "y".repeat(MAX_IDENTIFIER_LENGTH);
        let seq = sequence_name(&table, &column);
        assert!(seq.is_truncated());
        assert!(seq.as_str().len() <= MAX_IDENTIFIER_LENGTH);
        assert!(seq.as_str().ends_with("_seq"));
    }

    #[test]
    fn test_sequence_name_distinct_after_truncation() {
        // Same 50-byte prefix, different tails
        let table = "customer_account_balance_history_snapshots_monthly";
        let a = sequence_name(table, "ledger_entry_identifier_primary");
        let b = sequence_name(table, "ledger_entry_identifier_secondary");
        assert!(a.is_truncated() && b.is_truncated());
        assert_ne!(a, b);
        assert!(a.as_str().len() <= MAX_IDENTIFIER_LENGTH);
        assert!(b.as_str().len() <= MAX_IDENTIFIER_LENGTH);
    }

    #[test]
    fn test_sequence_name_respects_char_boundaries() {
        let table = "é".repeat(40);
        let column = "ü".repeat(10);
        let seq = sequence_name(&table, &column);
        assert!(seq.as_str().len() <= MAX_IDENTIFIER_LENGTH);
        assert!(seq.as_str().ends_with("_seq"));
    }

    #[test]
    fn test_sequence_name_qualified() {
        let seq = sequence_name("logs", "id");
        assert_eq!(seq.qualified("app").unwrap(), "\"app\".\"logs_id_seq\"");
    }
}
