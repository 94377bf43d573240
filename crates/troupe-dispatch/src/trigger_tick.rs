//! The trigger scheduler — fires due triggers by publishing pending events.
//!
//! Polling triggers are reserved for a separate mechanism and skipped here.
//! Per-trigger failures are isolated; one broken trigger never blocks the
//! rest of the batch.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use troupe_core::{Event, EventId, EventStatus, Trigger, TriggerType};
use troupe_store::{Store, StoreError};

use crate::cron::{self, TriggerConfig};

/// Default cadence of the trigger tick.
pub const TRIGGER_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Event type published when a trigger's config does not name one.
pub const DEFAULT_TRIGGER_EVENT: &str = "trigger_fired";

/// Spawn the periodic trigger scheduler. Stops when `cancel` fires.
pub fn spawn(
    store: Store,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = run_once(&store, Utc::now()) {
                        error!(error = %e, "trigger tick failed");
                    }
                }
                () = cancel.cancelled() => return,
            }
        }
    })
}

/// Evaluate due triggers once. Returns how many fired.
pub fn run_once(store: &Store, now: DateTime<Utc>) -> Result<usize, StoreError> {
    let due = store.due_triggers(now)?;
    if due.is_empty() {
        return Ok(0);
    }
    debug!(count = due.len(), "evaluating due triggers");

    let mut fired = 0;
    for trigger in due {
        if trigger.trigger_type == TriggerType::Polling {
            debug!(trigger_id = %trigger.id, "polling trigger skipped");
            continue;
        }
        let trigger_id = trigger.id.clone();
        if let Err(e) = fire_trigger(store, trigger, now) {
            error!(trigger_id = %trigger_id, error = %e, "trigger fire failed");
        } else {
            fired += 1;
        }
    }
    Ok(fired)
}

#[instrument(skip_all, fields(trigger_id = %trigger.id, persona_id = %trigger.persona_id))]
fn fire_trigger(store: &Store, trigger: Trigger, now: DateTime<Utc>) -> Result<(), StoreError> {
    let config = TriggerConfig::parse(trigger.config.as_deref());
    let event_type = config
        .event_type
        .clone()
        .unwrap_or_else(|| DEFAULT_TRIGGER_EVENT.to_string());

    // The event belongs to the persona's project; fall back to the
    // trigger's own project when the persona row is gone.
    let project_id = match store.persona(&trigger.persona_id)? {
        Some(persona) => persona.project_id,
        None => {
            warn!("trigger persona missing, using trigger project");
            trigger.project_id.clone()
        }
    };

    let event = Event {
        id: EventId::new(),
        project_id,
        event_type,
        source_type: "trigger".to_string(),
        source_id: Some(trigger.id.as_str().to_string()),
        target_persona_id: Some(trigger.persona_id.clone()),
        payload: config.payload.as_ref().map(|p| p.to_string()),
        status: EventStatus::Pending,
        use_case_id: trigger.use_case_id.clone(),
        error_message: None,
        created_at: now,
        processed_at: None,
    };
    store.insert_event(&event)?;

    let next = cron::next_fire_time(&trigger, &config, now);
    store.update_trigger_timings(&trigger.id, now, next)?;

    info!(
        event_id = %event.id,
        event_type = %event.event_type,
        next_fire = %next,
        "trigger fired"
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
