//! Core data models for the portfolio media service.
//!
//! Persisted entities map to SQLite tables via `sqlx::FromRow` and serialize
//! as JSON via `serde`; candidates live only in memory for one batch.

pub mod candidate;
pub mod contact;
pub mod image;
pub mod project;
pub mod settings;
