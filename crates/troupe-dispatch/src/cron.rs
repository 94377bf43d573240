//! Next-fire-time computation for schedule triggers.
//!
//! The supported schedule grammar is deliberately small: `every N{s,m,h,d}`
//! (case-insensitive) or a numeric `interval_seconds`. Anything else falls
//! back to one hour, loudly, so a misconfigured trigger is visible in the
//! logs instead of silently firing on the wrong cadence.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::warn;

use troupe_core::{Trigger, TriggerType};

/// Fallback cadence when the schedule expression is absent or unsupported.
fn fallback() -> Duration {
    Duration::hours(1)
}

/// Parsed trigger `config` blob. Unknown fields are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Schedule expression, e.g. `"every 10s"`.
    pub cron: Option<String>,
    /// Event type to publish; defaults to `"trigger_fired"`.
    pub event_type: Option<String>,
    /// Payload forwarded into the published event.
    pub payload: Option<serde_json::Value>,
    /// Plain interval alternative to `cron`.
    pub interval_seconds: Option<i64>,
}

impl TriggerConfig {
    /// Parse a trigger's raw config; malformed JSON yields the default.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match serde_json::from_str(raw) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "unparseable trigger config, using defaults");
                Self::default()
            }
        }
    }
}

/// Parse `every N{s,m,h,d}` (case-insensitive) into a duration.
pub fn parse_every(expr: &str) -> Option<Duration> {
    let rest = expr.trim().strip_prefix_ignore_case("every ")?;
    let rest = rest.trim();
    if rest.len() < 2 {
        return None;
    }
    let (digits, unit) = rest.split_at(rest.len() - 1);
    let n: i64 = digits.parse().ok()?;
    if n <= 0 {
        return None;
    }
    match unit.chars().next()?.to_ascii_lowercase() {
        's' => Some(Duration::seconds(n)),
        'm' => Some(Duration::minutes(n)),
        'h' => Some(Duration::hours(n)),
        'd' => Some(Duration::days(n)),
        _ => None,
    }
}

/// Compute when a trigger should fire next.
pub fn next_fire_time(trigger: &Trigger, config: &TriggerConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    if trigger.trigger_type == TriggerType::Schedule {
        if let Some(expr) = &config.cron {
            if let Some(step) = parse_every(expr) {
                return now + step;
            }
            warn!(
                trigger_id = %trigger.id,
                expr = %expr,
                "unsupported schedule expression, rescheduling in one hour"
            );
            return now + fallback();
        }
    }
    if let Some(secs) = config.interval_seconds {
        if secs > 0 {
            return now + Duration::seconds(secs);
        }
    }
    warn!(trigger_id = %trigger.id, "no usable schedule, rescheduling in one hour");
    now + fallback()
}

trait StripPrefixIgnoreCase {
    fn strip_prefix_ignore_case<'a>(&'a self, prefix: &str) -> Option<&'a str>;
}

impl StripPrefixIgnoreCase for str {
    fn strip_prefix_ignore_case<'a>(&'a self, prefix: &str) -> Option<&'a str> {
        match self.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(prefix) => Some(&self[prefix.len()..]),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
