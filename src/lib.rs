//! Warden -- Agent Trust-Boundary Runtime
//!
//! The defense pipeline that sits between an autonomous agent and the
//! world: content sanitization, tool vetting, social-engineering
//! screening, and process self-defense, sharing one pattern catalog and
//! one audit trail.

pub mod audit;
pub mod classifier;
pub mod config;
pub mod defense;
pub mod notify;
pub mod patterns;
pub mod runtime;
pub mod sanitizer;
pub mod social;
pub mod store;
pub mod types;
pub mod vault;
pub mod vetter;
