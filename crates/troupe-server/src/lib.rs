//! # troupe-server
//!
//! Hosts the orchestrator engine behind an Axum HTTP + WebSocket surface:
//! `/health`, the worker socket at `/ws?token=...`, and the execution API
//! (`/api/execute`, `/api/executions/{id}`, `/api/executions/{id}/cancel`)
//! guarded by the team API-key hash.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod logging;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use server::{AppState, TroupeServer};
pub use shutdown::ShutdownCoordinator;
