//! HTTP API and scheduler host for the loomwright agent workflow orchestrator.
//!
//! Wires the `loomwright-workflow` scheduler and its Postgres-backed
//! gateway, the NATS event bus, and the safety envelope behind a plain
//! axum JSON API. See `routes` for the external interface and `state`
//! for how the pieces are assembled per request.

pub mod alert_directory;
pub mod config;
pub mod db;
pub mod error;
pub mod observability;
pub mod routes;
pub mod state;
