//! Core types shared by the identity migration.
//!
//! - [`schema`]: Origin table and column metadata, and the read-only catalog
//! - [`identifier`]: Identifier quoting and sequence name synthesis

pub mod identifier;
pub mod schema;

pub use identifier::{qualify_pg, quote_literal, quote_pg, sequence_name, SequenceName};
pub use schema::{Column, SchemaCatalog, Table};
