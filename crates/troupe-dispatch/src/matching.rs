//! Event-to-subscription matching. Pure functions, no I/O.

use troupe_core::{Event, EventSubscription};

/// Subscriptions that accept the event, in enumeration order.
///
/// A subscription matches when it is enabled, its event type equals the
/// event's, the event's target persona (if pinned) owns it, and its source
/// filter (if any) accepts the event's source.
pub fn match_event<'a>(
    event: &Event,
    subscriptions: &'a [EventSubscription],
) -> Vec<&'a EventSubscription> {
    subscriptions
        .iter()
        .filter(|sub| {
            if !sub.enabled {
                return false;
            }
            if sub.event_type != event.event_type {
                return false;
            }
            if let Some(target) = &event.target_persona_id {
                if &sub.persona_id != target {
                    return false;
                }
            }
            if let Some(filter) = &sub.source_filter {
                if !source_filter_matches(filter, event.source_id.as_deref()) {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Whether a source filter accepts a source ID.
///
/// Exact match, or — when the filter ends in `*` — prefix match on the
/// filter minus that final character. The `*` is only special in trailing
/// position. A missing source never matches a filter.
pub fn source_filter_matches(filter: &str, source_id: Option<&str>) -> bool {
    let Some(source) = source_id else {
        return false;
    };
    match filter.strip_suffix('*') {
        Some(prefix) => source.starts_with(prefix),
        None => source == filter,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
