//! # troupe-store
//!
//! `SQLite` persistence for the orchestrator: personas, tools, credentials,
//! events, subscriptions, triggers and execution records.
//!
//! Uses `r2d2` connection pooling over `rusqlite` with WAL mode and foreign
//! keys enabled on every connection. The [`Store`] facade is the only type
//! other crates touch; the repository modules own the SQL.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
mod row;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use connection::{ConnectionConfig, ConnectionPool, PooledConnection};
pub use errors::{Result, StoreError};
pub use store::{Finalize, Store};
