//! Core data models for the code-addressed file sharing service.
//!
//! These entities represent the logical structure of share records.
//! They map cleanly to database rows via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod record;
