//! # troupe-core
//!
//! Shared domain model for the troupe orchestrator: branded ID newtypes,
//! the persona/event/trigger/execution records every subsystem exchanges,
//! and the status enums that gate their lifecycles.
//!
//! This crate is dependency-light on purpose — everything heavier (SQLite,
//! HTTP, WebSockets) lives in the crates that own those concerns.

#![deny(unsafe_code)]

pub mod ids;
pub mod types;

pub use ids::{
    CredentialId, EventId, ExecutionId, PersonaId, SubscriptionId, ToolId, TriggerId, WorkerId,
};
pub use types::{
    Credential, Event, EventStatus, EventSubscription, ExecRequest, ExecutionRecord,
    ExecutionStatus, ModelProfile, Persona, ToolDefinition, Trigger, TriggerType,
};

/// Tenancy fallback used when a caller does not scope a resource.
pub const DEFAULT_PROJECT: &str = "default";
