//! Persistence layer: Postgres-backed models and query functions.
//!
//! This crate owns the schema-shaped types ([`models`]) and the hand-written
//! `sqlx` query functions ([`queries`]) used by the orchestration core. It
//! has no opinions about scheduling or agent execution -- those live in
//! `drakeward-core`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
