//! The event processor — drains pending events and turns subscription
//! matches into execution submissions.
//!
//! Runs on its own interval task. Every failure is contained: a bad event,
//! a missing persona or a store hiccup is logged and the loop keeps going.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use troupe_core::{Event, EventStatus, ExecRequest, ExecutionId};
use troupe_store::{Store, StoreError};

use crate::dispatcher::Dispatcher;
use crate::matching;
use crate::prompt;

/// Default cadence of the event tick.
pub const EVENT_TICK_INTERVAL: Duration = Duration::from_secs(2);

/// How many pending events one tick drains at most.
pub const EVENT_BATCH_SIZE: usize = 50;

/// Terminal message when every match of an event failed.
pub const ALL_MATCHES_FAILED: &str = "All subscription matches failed";

/// Spawn the periodic event processor. Stops when `cancel` fires.
pub fn spawn(
    dispatcher: Arc<Dispatcher>,
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
                    if let Err(e) = run_once(&dispatcher, &store).await {
                        error!(error = %e, "event tick failed");
                    }
                }
                () = cancel.cancelled() => return,
            }
        }
    })
}

/// Drain one batch of pending events. Returns how many were processed.
pub async fn run_once(dispatcher: &Dispatcher, store: &Store) -> Result<usize, StoreError> {
    let pending = store.pending_events(EVENT_BATCH_SIZE)?;
    if pending.is_empty() {
        return Ok(0);
    }
    debug!(count = pending.len(), "processing pending events");

    let mut processed = 0;
    for event in pending {
        let event_id = event.id.clone();
        if let Err(e) = process_event(dispatcher, store, event).await {
            error!(event_id = %event_id, error = %e, "event processing failed");
        } else {
            processed += 1;
        }
    }
    Ok(processed)
}

#[instrument(skip_all, fields(event_id = %event.id, event_type = %event.event_type))]
async fn process_event(
    dispatcher: &Dispatcher,
    store: &Store,
    event: Event,
) -> Result<(), StoreError> {
    // The claim is the guard against overlapping ticks; losing it means
    // someone else owns the event now.
    if !store.claim_event(&event.id)? {
        debug!("event already claimed, skipping");
        return Ok(());
    }

    let subscriptions = store.subscriptions_for_event(&event)?;
    let matches = matching::match_event(&event, &subscriptions);
    if matches.is_empty() {
        debug!("no subscription matched");
        store.finish_event(&event.id, EventStatus::Skipped, None)?;
        return Ok(());
    }

    let input_data = event.payload.as_deref().map(|payload| {
        serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::json!({ "raw": payload }))
    });

    let mut delivered = 0usize;
    let mut failed = 0usize;
    for subscription in matches {
        let persona = match store.persona(&subscription.persona_id)? {
            Some(persona) => persona,
            None => {
                warn!(
                    persona_id = %subscription.persona_id,
                    "subscription points at a missing persona"
                );
                failed += 1;
                continue;
            }
        };

        let running = store.count_running_executions(&persona.id)?;
        if running >= persona.max_concurrent {
            info!(
                persona_id = %persona.id,
                running,
                max_concurrent = persona.max_concurrent,
                "persona at capacity, match skipped"
            );
            failed += 1;
            continue;
        }

        let tools = store.tools_for_persona(&persona.id)?;
        let prompt_text = prompt::assemble(&persona, &tools, input_data.as_ref(), &[]);

        dispatcher
            .submit(ExecRequest {
                execution_id: ExecutionId::new(),
                persona_id: persona.id.clone(),
                project_id: event.project_id.clone(),
                prompt: prompt_text,
                input_data: input_data.clone(),
                timeout_ms: None,
            })
            .await;
        delivered += 1;
    }

    let (status, message) = match (delivered, failed) {
        (0, _) => (EventStatus::Failed, Some(ALL_MATCHES_FAILED)),
        (_, 0) => (EventStatus::Delivered, None),
        _ => (EventStatus::Partial, None),
    };
    store.finish_event(&event.id, status, message)?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use troupe_auth::secrets::derive_master_key;
    use troupe_bus::MemoryBus;
    use troupe_core::{
        EventId, EventSubscription, ExecutionRecord, ExecutionStatus, Persona, PersonaId,
        SubscriptionId,
    };
    use troupe_pool::{PoolConfig, WorkerPool};

    use crate::dispatcher::DispatcherConfig;

    struct Rig {
        dispatcher: Arc<Dispatcher>,
        store: Store,
        _events: troupe_pool::PoolEventReceiver,
    }

    fn rig() -> Rig {
        let (pool, events) = WorkerPool::new(PoolConfig::default());
        let store = Store::open_in_memory().unwrap();
        let dispatcher = Dispatcher::new(
            pool,
            store.clone(),
            Arc::new(MemoryBus::new()),
            None,
            derive_master_key("test"),
            DispatcherConfig {
                fallback_token: Some("tok".into()),
                ..DispatcherConfig::default()
            },
        );
        Rig {
            dispatcher,
            store,
            _events: events,
        }
    }

    fn insert_persona(store: &Store, id: &str, max_concurrent: i64) {
        store
            .insert_persona(&Persona {
                id: PersonaId::from(id),
                project_id: "default".into(),
                name: format!("persona-{id}"),
                description: None,
                system_prompt: "prompt".into(),
                structured_prompt: None,
                enabled: true,
                max_concurrent,
                timeout_ms: 300_000,
                model_profile: None,
                max_budget_usd: None,
                max_turns: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .unwrap();
    }

    fn insert_subscription(store: &Store, id: &str, persona_id: &str, event_type: &str) {
        store
            .insert_subscription(&EventSubscription {
                id: SubscriptionId::from(id),
                project_id: "default".into(),
                persona_id: PersonaId::from(persona_id),
                event_type: event_type.into(),
                source_filter: None,
                enabled: true,
            })
            .unwrap();
    }

    fn insert_event(store: &Store, id: &str, event_type: &str, payload: Option<&str>) {
        store
            .insert_event(&Event {
                id: EventId::from(id),
                project_id: "default".into(),
                event_type: event_type.into(),
                source_type: "api".into(),
                source_id: None,
                target_persona_id: None,
                payload: payload.map(Into::into),
                status: EventStatus::Pending,
                use_case_id: None,
                error_message: None,
                created_at: Utc::now(),
                processed_at: None,
            })
            .unwrap();
    }

    fn mark_one_running(store: &Store, execution_id: &str, persona_id: &str) {
        let record = ExecutionRecord {
            id: ExecutionId::from(execution_id),
            project_id: "default".into(),
            persona_id: PersonaId::from(persona_id),
            status: ExecutionStatus::Queued,
            input_data: None,
            output_data: None,
            session_id: None,
            cost_usd: None,
            error_message: None,
            duration_ms: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        };
        store.insert_execution(&record).unwrap();
        store.mark_execution_running(&record.id, Utc::now()).unwrap();
    }

    fn event_status(store: &Store, id: &str) -> EventStatus {
        store.event(&EventId::from(id)).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn matched_event_is_delivered_and_submitted() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 3);
        insert_subscription(&rig.store, "s1", "p1", "gitlab_push");
        insert_event(&rig.store, "e1", "gitlab_push", Some(r#"{"repo":"a"}"#));

        let processed = run_once(&rig.dispatcher, &rig.store).await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(event_status(&rig.store, "e1"), EventStatus::Delivered);
        // No worker connected, so the submission waits in the queue.
        assert_eq!(rig.dispatcher.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn unmatched_event_is_skipped() {
        let rig = rig();
        insert_event(&rig.store, "e1", "nobody_cares", None);

        run_once(&rig.dispatcher, &rig.store).await.unwrap();
        assert_eq!(event_status(&rig.store, "e1"), EventStatus::Skipped);
        assert_eq!(rig.dispatcher.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn persona_at_capacity_fails_the_match() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 1);
        insert_subscription(&rig.store, "s1", "p1", "tick");
        mark_one_running(&rig.store, "running-1", "p1");
        insert_event(&rig.store, "e1", "tick", None);

        run_once(&rig.dispatcher, &rig.store).await.unwrap();

        let event = rig.store.event(&EventId::from("e1")).unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.error_message.as_deref(), Some(ALL_MATCHES_FAILED));
        assert_eq!(rig.dispatcher.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn mixed_outcomes_mark_partial() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 1);
        insert_persona(&rig.store, "p2", 1);
        insert_subscription(&rig.store, "s1", "p1", "tick");
        insert_subscription(&rig.store, "s2", "p2", "tick");
        // p1 is saturated, p2 has room.
        mark_one_running(&rig.store, "running-1", "p1");
        insert_event(&rig.store, "e1", "tick", None);

        run_once(&rig.dispatcher, &rig.store).await.unwrap();

        assert_eq!(event_status(&rig.store, "e1"), EventStatus::Partial);
        assert_eq!(rig.dispatcher.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn targeted_event_only_reaches_its_persona() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 5);
        insert_persona(&rig.store, "p2", 5);
        insert_subscription(&rig.store, "s1", "p1", "tick");
        insert_subscription(&rig.store, "s2", "p2", "tick");

        let event = troupe_core::Event {
            id: EventId::from("e1"),
            project_id: "default".into(),
            event_type: "tick".into(),
            source_type: "api".into(),
            source_id: None,
            target_persona_id: Some(PersonaId::from("p2")),
            payload: None,
            status: EventStatus::Pending,
            use_case_id: None,
            error_message: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        rig.store.insert_event(&event).unwrap();

        run_once(&rig.dispatcher, &rig.store).await.unwrap();

        assert_eq!(event_status(&rig.store, "e1"), EventStatus::Delivered);
        // Exactly one submission (for p2).
        assert_eq!(rig.dispatcher.queue_depth().await, 1);
    }

    #[tokio::test]
    async fn unparseable_payload_wraps_as_raw() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 5);
        insert_subscription(&rig.store, "s1", "p1", "tick");
        insert_event(&rig.store, "e1", "tick", Some("definitely not json"));

        run_once(&rig.dispatcher, &rig.store).await.unwrap();
        assert_eq!(event_status(&rig.store, "e1"), EventStatus::Delivered);

        // The queued record carries the wrapped payload.
        let queued = rig.dispatcher.queue_depth().await;
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn batch_preserves_oldest_first_and_is_bounded() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 100);
        insert_subscription(&rig.store, "s1", "p1", "tick");
        for i in 0..3 {
            insert_event(&rig.store, &format!("e{i}"), "tick", None);
        }

        let processed = run_once(&rig.dispatcher, &rig.store).await.unwrap();
        assert_eq!(processed, 3);
        for i in 0..3 {
            assert_eq!(
                event_status(&rig.store, &format!("e{i}")),
                EventStatus::Delivered
            );
        }
    }

    #[tokio::test]
    async fn already_claimed_events_are_left_alone() {
        let rig = rig();
        insert_persona(&rig.store, "p1", 5);
        insert_subscription(&rig.store, "s1", "p1", "tick");
        insert_event(&rig.store, "e1", "tick", None);
        // Another processor got there first.
        assert!(rig.store.claim_event(&EventId::from("e1")).unwrap());

        let processed = run_once(&rig.dispatcher, &rig.store).await.unwrap();
        assert_eq!(processed, 0);
        assert_eq!(event_status(&rig.store, "e1"), EventStatus::Processing);
    }

    #[tokio::test]
    async fn spawned_tick_stops_on_cancel() {
        let rig = rig();
        let cancel = CancellationToken::new();
        let handle = spawn(
            rig.dispatcher.clone(),
            rig.store.clone(),
            Duration::from_millis(10),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("tick did not stop")
            .unwrap();
    }
}
