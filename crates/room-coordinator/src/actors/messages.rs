//! Messages exchanged with the registry and room actors.
//!
//! Every request carries a `oneshot` reply channel; actors never answer
//! out of band. Handles wrap these in async methods so callers see a
//! plain `Result` API.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::room::RoomHandle;
use crate::errors::RoomError;
use crate::events::{EventEnvelope, Role, RoomSnapshot};
use crate::polls::PollSnapshot;

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinResult {
    /// Durable state at the moment of joining: roster, permissions,
    /// active polls. Ephemeral events missed while away are gone.
    pub snapshot: RoomSnapshot,
    /// This session's outbound event stream. Dropping it (or lagging
    /// behind) is treated as a disconnect.
    pub events: mpsc::Receiver<Arc<EventEnvelope>>,
}

/// Commands processed by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        identity: String,
        role: Role,
        respond_to: oneshot::Sender<Result<JoinResult, RoomError>>,
    },
    /// Idempotent: leaving an unknown identity succeeds (transport
    /// disconnects are implicit leaves, never errors).
    Leave {
        identity: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Fire-and-forget liveness refresh.
    Heartbeat {
        identity: String,
    },
    RaiseHand {
        identity: String,
        raised: bool,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    SendReaction {
        identity: String,
        emoji: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    SetPublishPermission {
        requester: String,
        target: String,
        can_publish: bool,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    RemoveParticipant {
        requester: String,
        target: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    CreatePoll {
        requester: String,
        question: String,
        options: Vec<String>,
        respond_to: oneshot::Sender<Result<PollSnapshot, RoomError>>,
    },
    Vote {
        identity: String,
        poll_id: Uuid,
        option_index: usize,
        respond_to: oneshot::Sender<Result<PollSnapshot, RoomError>>,
    },
    ClosePoll {
        requester: String,
        poll_id: Uuid,
        respond_to: oneshot::Sender<Result<PollSnapshot, RoomError>>,
    },
    GetSnapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
    EndRoom {
        requester: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// Commands processed by the `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Resolve or create the room for `room_id`. Concurrent calls for
    /// the same id serialize through the registry mailbox and return
    /// the same room.
    GetOrCreate {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomHandle, RoomError>>,
    },
    /// Resolve an existing room only.
    Get {
        room_id: String,
        respond_to: oneshot::Sender<Result<RoomHandle, RoomError>>,
    },
    /// Cancel and reap a room. Safe to call for absent ids.
    Remove {
        room_id: String,
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
    /// Sent by a room actor as it exits so the registry reaps its entry.
    /// `ended` is true only when an instructor ended the room; the
    /// registry tombstones those ids. Rooms reclaimed for idleness or
    /// cancelled by the registry stay creatable.
    RoomExited {
        room_id: String,
        ended: bool,
    },
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },
    Shutdown {
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Rooms currently registered.
    pub room_count: usize,
    /// Participant sessions across all rooms.
    pub session_count: usize,
    /// False once shutdown has begun.
    pub accepting_new: bool,
    /// Registry mailbox depth.
    pub mailbox_depth: usize,
}
