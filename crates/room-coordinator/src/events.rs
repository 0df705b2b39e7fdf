//! Wire model for room events and state snapshots.
//!
//! Every event fanned out to connected clients is serialized as
//! `{"type": ..., "payload": ..., "roomId": ...}`. Events are delivered
//! in per-room broadcast order over per-participant FIFO channels;
//! ephemeral events (reactions, hand state) are never retained after
//! fan-out, while durable state (roster, permissions, polls) is
//! reconstructable from a [`RoomSnapshot`] on rejoin.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::polls::PollSnapshot;

/// Participant role within a room.
///
/// Roles are supplied by the external identity provider at join time
/// and re-checked against the live roster on every privileged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Instructor,
    Student,
}

impl Role {
    #[must_use]
    pub fn is_instructor(self) -> bool {
        matches!(self, Role::Instructor)
    }
}

/// Room lifecycle state. `Ended` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Scheduled,
    Live,
    Ended,
}

/// Why a participant left the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaveReason {
    /// Explicit leave or transport disconnect (a dropped or lagging
    /// event channel counts as a disconnect). Moderation removal and
    /// room end have their own events.
    Voluntary,
    /// No heartbeat within the liveness window.
    HeartbeatTimeout,
}

/// Wire-facing view of a participant session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    pub identity: String,
    pub role: Role,
    pub can_publish: bool,
    pub hand_raised: bool,
    /// Unix timestamp (seconds) of the join.
    pub connected_at: i64,
}

/// Durable room state, recomputed under the room's serialization point.
///
/// Delivered to a joining participant so a reconnect after a gap can
/// rebuild roster, permissions and active polls without replaying the
/// ephemeral events it missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub status: RoomStatus,
    pub participants: Vec<ParticipantInfo>,
    pub active_polls: Vec<PollSnapshot>,
    /// Unix timestamp (seconds) of room creation.
    pub created_at: i64,
}

/// An event fanned out to every connected participant of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    ParticipantJoined {
        participant: ParticipantInfo,
    },
    ParticipantLeft {
        identity: String,
        reason: LeaveReason,
    },
    PermissionChanged {
        identity: String,
        can_publish: bool,
        changed_by: String,
    },
    ParticipantRemoved {
        identity: String,
        removed_by: String,
    },
    HandStateChanged {
        identity: String,
        raised: bool,
    },
    /// Pure ephemeral signal: broadcast and forgotten.
    ReactionSent {
        emoji: String,
        sender: String,
        /// Unix timestamp in milliseconds.
        timestamp: i64,
    },
    PollCreated {
        poll: PollSnapshot,
    },
    /// Carries the recomputed tally only, never raw per-identity votes.
    PollTallyChanged {
        poll_id: Uuid,
        tally: Vec<u64>,
        total_votes: u64,
    },
    PollClosed {
        poll_id: Uuid,
        tally: Vec<u64>,
        total_votes: u64,
    },
    RoomEnded {
        ended_by: String,
    },
}

impl RoomEvent {
    /// Build a reaction event stamped with the current time.
    #[must_use]
    pub fn reaction(emoji: String, sender: String) -> Self {
        RoomEvent::ReactionSent {
            emoji,
            sender,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// The serialized unit of fan-out: `{type, payload, roomId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: RoomEvent,
    #[serde(rename = "roomId")]
    pub room_id: String,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(room_id: impl Into<String>, event: RoomEvent) -> Self {
        Self {
            event,
            room_id: room_id.into(),
        }
    }
}
