//! Pattern Catalog
//!
//! Data-driven tables of dangerous patterns, risk weights, and category
//! labels. The catalog is the single source of truth for deterministic
//! detection, shared by every defense stage.

pub mod catalog;
pub mod overlay;
pub mod secrets;

pub use catalog::{PatternCatalog, PatternMatch, PatternRule};
