//! Participant sessions and their outbound event channels.
//!
//! A `ParticipantSession` is the per-connection record a room keeps for
//! one identity: role, publish permission, hand state, join time and
//! last-seen heartbeat. Sessions are owned exclusively by their
//! `RoomActor`; nothing outside the room mutates them.
//!
//! Fan-out goes through a bounded [`SessionSender`]. Delivery uses
//! `try_send` so a slow or disconnected receiver can never block the
//! room's message loop; the room treats a failed delivery as an
//! implicit leave.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::events::{EventEnvelope, ParticipantInfo, Role};

/// Outbound channel capacity per participant session.
pub const SESSION_CHANNEL_BUFFER: usize = 256;

/// Why an event could not be delivered to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// The participant's channel is full (slow receiver).
    Full,
    /// The participant's receiver was dropped (disconnected transport).
    Closed,
}

/// Sending half of a session's outbound event channel.
#[derive(Debug, Clone)]
pub struct SessionSender {
    tx: mpsc::Sender<Arc<EventEnvelope>>,
}

impl SessionSender {
    /// Create an outbound channel pair with the given capacity.
    ///
    /// The receiver goes to the transport layer (returned from `join`);
    /// the sender stays with the room.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<EventEnvelope>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Deliver an event without blocking.
    ///
    /// # Errors
    ///
    /// `Full` if the receiver is lagging, `Closed` if it is gone. Either
    /// way the caller drops this session rather than backpressuring the
    /// room.
    pub fn try_deliver(&self, envelope: Arc<EventEnvelope>) -> Result<(), DeliveryError> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// One identity's session within a room.
#[derive(Debug)]
pub struct ParticipantSession {
    /// Display name / user id, unique within the room.
    pub identity: String,
    /// Role as supplied by the identity provider at join time.
    pub role: Role,
    /// Audio/video publish permission, toggled by moderation.
    pub can_publish: bool,
    /// Hand-raise state, toggled by the participant.
    pub hand_raised: bool,
    /// Unix timestamp (seconds) of the join.
    pub connected_at: i64,
    /// Last heartbeat, on the tokio clock so tests can pause time.
    last_seen: Instant,
    sender: SessionSender,
}

impl ParticipantSession {
    /// Create a session record for a freshly joined identity.
    ///
    /// Publish permission starts enabled for every role; moderation
    /// revokes it per identity.
    #[must_use]
    pub fn new(identity: String, role: Role, sender: SessionSender) -> Self {
        Self {
            identity,
            role,
            can_publish: true,
            hand_raised: false,
            connected_at: Utc::now().timestamp(),
            last_seen: Instant::now(),
            sender,
        }
    }

    /// Wire-facing view of this session.
    #[must_use]
    pub fn to_info(&self) -> ParticipantInfo {
        ParticipantInfo {
            identity: self.identity.clone(),
            role: self.role,
            can_publish: self.can_publish,
            hand_raised: self.hand_raised,
            connected_at: self.connected_at,
        }
    }

    /// Refresh the liveness clock.
    pub fn record_heartbeat(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Whether this session has been silent beyond the liveness window.
    #[must_use]
    pub fn is_stale(&self, window: Duration) -> bool {
        Instant::now().duration_since(self.last_seen) >= window
    }

    /// Deliver an event to this session without blocking.
    ///
    /// # Errors
    ///
    /// See [`SessionSender::try_deliver`].
    pub fn try_deliver(&self, envelope: Arc<EventEnvelope>) -> Result<(), DeliveryError> {
        self.sender.try_deliver(envelope)
    }
}
