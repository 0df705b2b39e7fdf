//! Prometheus metric definitions.
//!
//! Naming conventions:
//! - `rc_` prefix for the room coordinator
//! - `_total` suffix for counters
//!
//! Labels are bounded to keep cardinality low: `actor_type` has two
//! values (registry, room) and `reason` is a small fixed set. Room ids
//! and identities are never used as labels.

use metrics::{counter, gauge};

/// Set the number of live rooms.
///
/// Metric: `rc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Set the number of connected participant sessions across all rooms.
///
/// Metric: `rc_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_sessions_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `rc_actor_mailbox_depth`
/// Labels: `actor_type` (registry, room)
///
/// High values mean the actor is falling behind its mailbox.
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

/// Record an event dropped on a slow or closed session channel.
///
/// Metric: `rc_events_dropped_total`
pub fn record_event_dropped() {
    counter!("rc_events_dropped_total").increment(1);
}

/// Record a created poll.
///
/// Metric: `rc_polls_created_total`
pub fn record_poll_created() {
    counter!("rc_polls_created_total").increment(1);
}

/// Record a moderation action.
///
/// Metric: `rc_moderation_actions_total`
/// Labels: `action` (permission, remove, end)
pub fn record_moderation_action(action: &str) {
    counter!("rc_moderation_actions_total", "action" => action.to_string()).increment(1);
}

/// Record an actor panic.
///
/// Metric: `rc_actor_panics_total`
/// Labels: `actor_type` (registry, room)
pub fn record_actor_panic(actor_type: &str) {
    counter!("rc_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}
