//! Warden Store
//!
//! SQLite-backed persistence for the audit trail, threat records, and
//! screening attempts. Append-only: rows are inserted and pruned on a
//! retention window, never updated.

mod database;
mod schema;

pub use database::Database;
pub use schema::{CREATE_TABLES, SCHEMA_VERSION};
