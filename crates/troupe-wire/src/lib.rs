//! # troupe-wire
//!
//! The framed message protocol between the orchestrator and its workers.
//!
//! Each WebSocket text frame carries exactly one JSON object discriminated
//! by a lowercase `type` field, with camelCase payload keys. The exchange is
//! asymmetric — workers and the orchestrator send disjoint variant sets —
//! but encode/decode is symmetric so either side can embed the codec.
//!
//! Workers written in other languages depend on these exact shapes; the
//! tests in this crate pin them.

#![deny(unsafe_code)]

pub mod protocol;

pub use protocol::{
    AssignConfig, OrchestratorMessage, PersonaEventKind, WireError, WorkerMessage,
};
