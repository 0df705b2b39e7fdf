//! `RoomActor` - per-room actor that owns all session-scoped state.
//!
//! Each `RoomActor`:
//! - Owns one room's roster, permission state, polls and hand-raise set
//! - Serializes every mutation through its mailbox (single-writer)
//! - Fans events out to per-participant bounded channels
//! - Enforces moderation rules against the live roster at call time
//!
//! # Lifecycle
//!
//! `Scheduled → Live → Ended`, no backward transitions. The first
//! successful join makes the room live. A room empty beyond the grace
//! period reclaims itself; the registry reaps its entry on exit. An
//! ended room rejects every further mutation with `RoomClosed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::messages::{JoinResult, RegistryMessage, RoomMessage};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{ParticipantSession, SessionSender, SESSION_CHANNEL_BUFFER};
use crate::config::Config;
use crate::errors::RoomError;
use crate::events::{LeaveReason, Role, RoomEvent, RoomSnapshot, RoomStatus};
use crate::media::SharedMediaControl;
use crate::polls::{PollBoard, PollSnapshot};

/// Channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How often the room checks heartbeats and the empty-room grace clock.
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Identity reported in `RoomEnded` when the coordinator itself shuts
/// a room down rather than an instructor.
const SERVER_IDENTITY: &str = "server";

/// Tunables applied to every room spawned by a registry.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Grace period before an empty, non-ended room reclaims itself.
    pub empty_room_grace: Duration,
    /// Sessions silent for longer are treated as disconnected.
    pub heartbeat_timeout: Duration,
    /// Bound on waiting for the room mailbox before failing `Timeout`.
    pub command_timeout: Duration,
    /// Outbound channel capacity per participant session.
    pub session_buffer: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            empty_room_grace: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(1),
            session_buffer: SESSION_CHANNEL_BUFFER,
        }
    }
}

impl RoomSettings {
    /// Derive room settings from the service configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            empty_room_grace: config.empty_room_grace(),
            heartbeat_timeout: config.heartbeat_timeout(),
            command_timeout: config.command_timeout(),
            session_buffer: SESSION_CHANNEL_BUFFER,
        }
    }
}

/// Handle to a `RoomActor`.
///
/// Cloneable; all clones address the same room. Commands that cannot be
/// enqueued within the configured timeout fail with `Timeout`; commands
/// sent to a room that already exited fail with `RoomClosed`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    command_timeout: Duration,
}

impl RoomHandle {
    /// Get the room id.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Join the room with an already-authenticated identity and role.
    ///
    /// Returns the durable-state snapshot plus this session's outbound
    /// event stream. Fails with `DuplicateIdentity` if the identity is
    /// already connected.
    pub async fn join(
        &self,
        identity: impl Into<String>,
        role: Role,
    ) -> Result<JoinResult, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Join {
            identity: identity.into(),
            role,
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Leave the room. Idempotent: an unknown identity is a no-op.
    pub async fn leave(&self, identity: impl Into<String>) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Leave {
            identity: identity.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Refresh the identity's liveness clock.
    pub async fn heartbeat(&self, identity: impl Into<String>) -> Result<(), RoomError> {
        self.send(RoomMessage::Heartbeat {
            identity: identity.into(),
        })
        .await
    }

    /// Toggle the caller's own hand state.
    pub async fn raise_hand(
        &self,
        identity: impl Into<String>,
        raised: bool,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::RaiseHand {
            identity: identity.into(),
            raised,
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Broadcast an ephemeral reaction. Nothing is retained.
    pub async fn send_reaction(
        &self,
        identity: impl Into<String>,
        emoji: impl Into<String>,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::SendReaction {
            identity: identity.into(),
            emoji: emoji.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Toggle a participant's publish permission (instructor only).
    pub async fn set_publish_permission(
        &self,
        requester: impl Into<String>,
        target: impl Into<String>,
        can_publish: bool,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::SetPublishPermission {
            requester: requester.into(),
            target: target.into(),
            can_publish,
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Remove a participant from the room (instructor only).
    pub async fn remove_participant(
        &self,
        requester: impl Into<String>,
        target: impl Into<String>,
    ) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::RemoveParticipant {
            requester: requester.into(),
            target: target.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Create a poll (instructor only).
    pub async fn create_poll(
        &self,
        requester: impl Into<String>,
        question: impl Into<String>,
        options: Vec<String>,
    ) -> Result<PollSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::CreatePoll {
            requester: requester.into(),
            question: question.into(),
            options,
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Cast or overwrite a vote on an active poll.
    pub async fn vote(
        &self,
        identity: impl Into<String>,
        poll_id: Uuid,
        option_index: usize,
    ) -> Result<PollSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::Vote {
            identity: identity.into(),
            poll_id,
            option_index,
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Close a poll (instructor only). Close is authoritative: votes in
    /// flight behind it are rejected.
    pub async fn close_poll(
        &self,
        requester: impl Into<String>,
        poll_id: Uuid,
    ) -> Result<PollSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::ClosePoll {
            requester: requester.into(),
            poll_id,
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Current durable-state snapshot.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::GetSnapshot { respond_to: tx }).await?;
        self.recv(rx).await
    }

    /// End the room (instructor only). Terminal.
    pub async fn end_room(&self, requester: impl Into<String>) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RoomMessage::EndRoom {
            requester: requester.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RoomMessage) -> Result<(), RoomError> {
        match tokio::time::timeout(self.command_timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            // Receiver gone: the room exited. Drop the handle, re-resolve.
            Ok(Err(_)) => Err(RoomError::RoomClosed),
            // Mailbox saturated within the bound: fail rather than queue.
            Err(_) => Err(RoomError::Timeout),
        }
    }

    async fn recv<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, RoomError> {
        // A dropped reply means the actor shut down mid-command.
        rx.await.map_err(|_| RoomError::RoomClosed)
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room id (unique key in the registry).
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the registry's token).
    cancel_token: CancellationToken,
    status: RoomStatus,
    /// Set only by an instructor's `EndRoom`. Cancellation by the
    /// registry (explicit remove, coordinator shutdown) also ends the
    /// room but must not tombstone the id.
    ended_by_instructor: bool,
    /// Roster: identity -> session. Owned exclusively by this actor.
    participants: HashMap<String, ParticipantSession>,
    /// Polls in creation order.
    polls: PollBoard,
    /// Unix timestamp (seconds) of room creation.
    created_at: i64,
    /// Set while the roster is empty; drives reclamation.
    empty_since: Option<Instant>,
    settings: RoomSettings,
    media: SharedMediaControl,
    /// Exit notification channel back to the registry.
    registry_notify: mpsc::Sender<RegistryMessage>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        cancel_token: CancellationToken,
        settings: RoomSettings,
        media: SharedMediaControl,
        registry_notify: mpsc::Sender<RegistryMessage>,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let command_timeout = settings.command_timeout;

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            status: RoomStatus::Scheduled,
            ended_by_instructor: false,
            participants: HashMap::new(),
            polls: PollBoard::default(),
            created_at: chrono::Utc::now().timestamp(),
            // A room that never sees a join is reclaimable too.
            empty_since: Some(Instant::now()),
            settings,
            media,
            registry_notify,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
            command_timeout,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );

        let mut liveness_check = tokio::time::interval(LIVENESS_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                _ = liveness_check.tick() => {
                    self.check_heartbeats();
                    if self.should_reclaim() {
                        info!(
                            target: "rc.actor.room",
                            room_id = %self.room_id,
                            grace_seconds = self.settings.empty_room_grace.as_secs(),
                            "Empty past grace period, reclaiming room"
                        );
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        let ended = self.ended_by_instructor;
        let _ = self.registry_notify.try_send(RegistryMessage::RoomExited {
            room_id: self.room_id.clone(),
            ended,
        });

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            ended = ended,
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                identity,
                role,
                respond_to,
            } => {
                let result = self.handle_join(identity, role);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                identity,
                respond_to,
            } => {
                let result = self.handle_leave(&identity);
                let _ = respond_to.send(result);
            }

            RoomMessage::Heartbeat { identity } => {
                if let Some(session) = self.participants.get_mut(&identity) {
                    session.record_heartbeat();
                }
            }

            RoomMessage::RaiseHand {
                identity,
                raised,
                respond_to,
            } => {
                let result = self.handle_raise_hand(&identity, raised);
                let _ = respond_to.send(result);
            }

            RoomMessage::SendReaction {
                identity,
                emoji,
                respond_to,
            } => {
                let result = self.handle_reaction(&identity, emoji);
                let _ = respond_to.send(result);
            }

            RoomMessage::SetPublishPermission {
                requester,
                target,
                can_publish,
                respond_to,
            } => {
                let result = self.handle_set_publish_permission(&requester, &target, can_publish);
                let _ = respond_to.send(result);
            }

            RoomMessage::RemoveParticipant {
                requester,
                target,
                respond_to,
            } => {
                let result = self.handle_remove_participant(&requester, &target);
                let _ = respond_to.send(result);
            }

            RoomMessage::CreatePoll {
                requester,
                question,
                options,
                respond_to,
            } => {
                let result = self.handle_create_poll(&requester, &question, options);
                let _ = respond_to.send(result);
            }

            RoomMessage::Vote {
                identity,
                poll_id,
                option_index,
                respond_to,
            } => {
                let result = self.handle_vote(&identity, poll_id, option_index);
                let _ = respond_to.send(result);
            }

            RoomMessage::ClosePoll {
                requester,
                poll_id,
                respond_to,
            } => {
                let result = self.handle_close_poll(&requester, poll_id);
                let _ = respond_to.send(result);
            }

            RoomMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }

            RoomMessage::EndRoom {
                requester,
                respond_to,
            } => {
                let result = self.handle_end_room(&requester);
                let _ = respond_to.send(result);
            }
        }
    }

    /// Handle a join request.
    #[instrument(skip_all, fields(room_id = %self.room_id))]
    fn handle_join(&mut self, identity: String, role: Role) -> Result<JoinResult, RoomError> {
        self.ensure_open()?;

        // Reject rather than disambiguate: the caller layer picks a new
        // identity and retries.
        if self.participants.contains_key(&identity) {
            return Err(RoomError::DuplicateIdentity(identity));
        }

        let (sender, events) = SessionSender::channel(self.settings.session_buffer);
        let session = ParticipantSession::new(identity.clone(), role, sender);
        let participant = session.to_info();

        self.participants.insert(identity.clone(), session);
        self.empty_since = None;
        self.metrics.session_opened();

        if self.status == RoomStatus::Scheduled {
            self.status = RoomStatus::Live;
            info!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                "First participant joined, room is live"
            );
        }

        // Snapshot includes the joiner; the join broadcast goes to the
        // rest of the roster.
        let snapshot = self.snapshot();
        self.broadcast_except(&identity, RoomEvent::ParticipantJoined { participant });

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            participants = self.participants.len(),
            "Participant joined"
        );

        Ok(JoinResult { snapshot, events })
    }

    /// Handle an explicit leave or transport disconnect. Idempotent.
    fn handle_leave(&mut self, identity: &str) -> Result<(), RoomError> {
        if self.status == RoomStatus::Ended {
            // Disconnects during teardown are not errors.
            return Ok(());
        }
        self.drop_session(identity, LeaveReason::Voluntary);
        Ok(())
    }

    /// Handle a hand-raise toggle. Touches no poll or roster state.
    fn handle_raise_hand(&mut self, identity: &str, raised: bool) -> Result<(), RoomError> {
        self.ensure_open()?;

        let session = self
            .participants
            .get_mut(identity)
            .ok_or_else(|| RoomError::NotFound("participant not found".to_string()))?;
        session.hand_raised = raised;

        self.broadcast(RoomEvent::HandStateChanged {
            identity: identity.to_string(),
            raised,
        });
        Ok(())
    }

    /// Handle an ephemeral reaction: broadcast and retain nothing.
    fn handle_reaction(&mut self, identity: &str, emoji: String) -> Result<(), RoomError> {
        self.ensure_open()?;

        if emoji.trim().is_empty() {
            return Err(RoomError::InvalidArgument(
                "reaction emoji must not be empty".to_string(),
            ));
        }
        if !self.participants.contains_key(identity) {
            return Err(RoomError::NotFound("participant not found".to_string()));
        }

        self.broadcast(RoomEvent::reaction(emoji, identity.to_string()));
        Ok(())
    }

    /// Handle a publish-permission toggle (instructor only).
    #[instrument(skip_all, fields(room_id = %self.room_id))]
    fn handle_set_publish_permission(
        &mut self,
        requester: &str,
        target: &str,
        can_publish: bool,
    ) -> Result<(), RoomError> {
        self.ensure_open()?;
        self.ensure_instructor(requester, "change publish permissions")?;

        let session = self
            .participants
            .get_mut(target)
            .ok_or_else(|| RoomError::NotFound("participant not found".to_string()))?;
        session.can_publish = can_publish;
        crate::observability::metrics::record_moderation_action("permission");

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            target = %target,
            can_publish = can_publish,
            "Publish permission changed"
        );

        self.broadcast(RoomEvent::PermissionChanged {
            identity: target.to_string(),
            can_publish,
            changed_by: requester.to_string(),
        });
        Ok(())
    }

    /// Handle a participant removal (instructor only).
    #[instrument(skip_all, fields(room_id = %self.room_id))]
    fn handle_remove_participant(&mut self, requester: &str, target: &str) -> Result<(), RoomError> {
        self.ensure_open()?;
        self.ensure_instructor(requester, "remove participants")?;

        // Dropping the session closes the target's outbound channel,
        // which the transport layer treats as its disconnect.
        if self.participants.remove(target).is_none() {
            return Err(RoomError::NotFound("participant not found".to_string()));
        }
        self.metrics.session_closed();
        crate::observability::metrics::record_moderation_action("remove");
        if self.participants.is_empty() {
            self.empty_since = Some(Instant::now());
        }

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            target = %target,
            remaining_participants = self.participants.len(),
            "Participant removed by moderation"
        );

        self.broadcast(RoomEvent::ParticipantRemoved {
            identity: target.to_string(),
            removed_by: requester.to_string(),
        });

        // Tear down the media stream via the external provider.
        self.media.force_disconnect(&self.room_id, target);
        Ok(())
    }

    /// Handle poll creation (instructor only).
    fn handle_create_poll(
        &mut self,
        requester: &str,
        question: &str,
        options: Vec<String>,
    ) -> Result<PollSnapshot, RoomError> {
        self.ensure_open()?;
        self.ensure_instructor(requester, "create polls")?;

        let snapshot = self.polls.create(question, options)?;
        crate::observability::metrics::record_poll_created();

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            poll_id = %snapshot.id,
            options = snapshot.options.len(),
            "Poll created"
        );

        self.broadcast(RoomEvent::PollCreated {
            poll: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Handle a vote. Re-voting overwrites until the poll closes.
    fn handle_vote(
        &mut self,
        identity: &str,
        poll_id: Uuid,
        option_index: usize,
    ) -> Result<PollSnapshot, RoomError> {
        self.ensure_open()?;

        if !self.participants.contains_key(identity) {
            return Err(RoomError::NotFound("participant not found".to_string()));
        }

        let snapshot = self.polls.vote(identity, poll_id, option_index)?;

        self.broadcast(RoomEvent::PollTallyChanged {
            poll_id,
            tally: snapshot.tally.clone(),
            total_votes: snapshot.total_votes,
        });
        Ok(snapshot)
    }

    /// Handle poll close (instructor only).
    fn handle_close_poll(&mut self, requester: &str, poll_id: Uuid) -> Result<PollSnapshot, RoomError> {
        self.ensure_open()?;
        self.ensure_instructor(requester, "close polls")?;

        let snapshot = self.polls.close(poll_id)?;

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            poll_id = %poll_id,
            total_votes = snapshot.total_votes,
            "Poll closed"
        );

        self.broadcast(RoomEvent::PollClosed {
            poll_id,
            tally: snapshot.tally.clone(),
            total_votes: snapshot.total_votes,
        });
        Ok(snapshot)
    }

    /// Handle room end (instructor only). Terminal.
    #[instrument(skip_all, fields(room_id = %self.room_id))]
    fn handle_end_room(&mut self, requester: &str) -> Result<(), RoomError> {
        self.ensure_open()?;
        self.ensure_instructor(requester, "end the room")?;
        crate::observability::metrics::record_moderation_action("end");

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            participants = self.participants.len(),
            "Ending room"
        );

        self.status = RoomStatus::Ended;
        self.ended_by_instructor = true;
        self.broadcast(RoomEvent::RoomEnded {
            ended_by: requester.to_string(),
        });
        self.close_all_sessions();

        // Triggers the run loop's cancellation branch on the next turn.
        self.cancel_token.cancel();
        Ok(())
    }

    /// Current durable-state snapshot. Roster is sorted by identity for
    /// stable output.
    fn snapshot(&self) -> RoomSnapshot {
        let mut participants: Vec<_> = self
            .participants
            .values()
            .map(ParticipantSession::to_info)
            .collect();
        participants.sort_by(|a, b| a.identity.cmp(&b.identity));

        RoomSnapshot {
            room_id: self.room_id.clone(),
            status: self.status,
            participants,
            active_polls: self.polls.active_snapshots(),
            created_at: self.created_at,
        }
    }

    fn ensure_open(&self) -> Result<(), RoomError> {
        if self.status == RoomStatus::Ended {
            return Err(RoomError::RoomClosed);
        }
        Ok(())
    }

    /// Authorize a privileged action against the requester's *current*
    /// roster record. A removed or demoted instructor loses moderation
    /// power the instant the roster changes.
    fn ensure_instructor(&self, requester: &str, action: &str) -> Result<(), RoomError> {
        let session = self
            .participants
            .get(requester)
            .ok_or_else(|| RoomError::Forbidden("requester is not in the room".to_string()))?;
        if !session.role.is_instructor() {
            return Err(RoomError::Forbidden(format!(
                "only the instructor may {action}"
            )));
        }
        Ok(())
    }

    /// Deliver an event to every connected session.
    fn broadcast(&mut self, event: RoomEvent) {
        self.fan_out(None, event);
    }

    /// Deliver an event to every connected session except one.
    fn broadcast_except(&mut self, except: &str, event: RoomEvent) {
        self.fan_out(Some(except), event);
    }

    /// Fan an event out to per-session channels. A full or closed
    /// channel never blocks the rest of the roster: the failing session
    /// is dropped afterwards as an implicit leave.
    fn fan_out(&mut self, except: Option<&str>, event: RoomEvent) {
        let envelope = Arc::new(crate::events::EventEnvelope::new(self.room_id.clone(), event));

        let mut dropped: Vec<String> = Vec::new();
        for (identity, session) in &self.participants {
            if Some(identity.as_str()) == except {
                continue;
            }
            if let Err(reason) = session.try_deliver(Arc::clone(&envelope)) {
                warn!(
                    target: "rc.actor.room",
                    room_id = %self.room_id,
                    identity = %identity,
                    reason = ?reason,
                    "Dropping unreachable participant channel"
                );
                self.metrics.record_event_dropped();
                dropped.push(identity.clone());
            }
        }

        for identity in dropped {
            self.drop_session(&identity, LeaveReason::Voluntary);
        }
    }

    /// Remove a session and tell the rest of the roster. No-op for
    /// unknown identities.
    fn drop_session(&mut self, identity: &str, reason: LeaveReason) {
        if self.participants.remove(identity).is_none() {
            return;
        }
        self.metrics.session_closed();
        if self.participants.is_empty() {
            self.empty_since = Some(Instant::now());
        }

        debug!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            identity = %identity,
            reason = ?reason,
            remaining_participants = self.participants.len(),
            "Participant left"
        );

        self.fan_out(
            None,
            RoomEvent::ParticipantLeft {
                identity: identity.to_string(),
                reason,
            },
        );
    }

    /// Disconnect sessions that missed the heartbeat window.
    fn check_heartbeats(&mut self) {
        let window = self.settings.heartbeat_timeout;
        let stale: Vec<String> = self
            .participants
            .iter()
            .filter(|(_, session)| session.is_stale(window))
            .map(|(identity, _)| identity.clone())
            .collect();

        for identity in stale {
            info!(
                target: "rc.actor.room",
                room_id = %self.room_id,
                identity = %identity,
                window_seconds = window.as_secs(),
                "Heartbeat window expired, disconnecting participant"
            );
            self.drop_session(&identity, LeaveReason::HeartbeatTimeout);
        }
    }

    /// Whether this room has been empty long enough to reclaim.
    fn should_reclaim(&self) -> bool {
        if !self.participants.is_empty() || self.status == RoomStatus::Ended {
            return false;
        }
        self.empty_since
            .is_some_and(|since| Instant::now().duration_since(since) >= self.settings.empty_room_grace)
    }

    fn close_all_sessions(&mut self) {
        let count = self.participants.len();
        self.participants.clear();
        for _ in 0..count {
            self.metrics.session_closed();
        }
    }

    /// Perform graceful shutdown on cancellation.
    fn graceful_shutdown(&mut self) {
        if self.status != RoomStatus::Ended {
            self.status = RoomStatus::Ended;
            self.broadcast(RoomEvent::RoomEnded {
                ended_by: SERVER_IDENTITY.to_string(),
            });
        }
        self.close_all_sessions();

        info!(
            target: "rc.actor.room",
            room_id = %self.room_id,
            "Graceful shutdown complete"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::events::EventEnvelope;
    use crate::media::NoopMediaControl;

    fn test_settings() -> RoomSettings {
        RoomSettings::default()
    }

    fn spawn_room(
        room_id: &str,
        settings: RoomSettings,
    ) -> (
        RoomHandle,
        JoinHandle<()>,
        mpsc::Receiver<RegistryMessage>,
    ) {
        let (notify_tx, notify_rx) = mpsc::channel(8);
        let (handle, task) = RoomActor::spawn(
            room_id.to_string(),
            CancellationToken::new(),
            settings,
            Arc::new(NoopMediaControl),
            notify_tx,
            ActorMetrics::new(),
        );
        (handle, task, notify_rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<Arc<EventEnvelope>>) -> EventEnvelope {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .map(|e| (*e).clone())
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_join_transitions_to_live_and_returns_snapshot() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let joined = room.join("teacher", Role::Instructor).await.unwrap();
        assert_eq!(joined.snapshot.status, RoomStatus::Live);
        assert_eq!(joined.snapshot.participants.len(), 1);
        assert_eq!(joined.snapshot.participants[0].identity, "teacher");
        assert!(joined.snapshot.active_polls.is_empty());

        room.cancel();
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _first = room.join("alice", Role::Student).await.unwrap();
        let result = room.join("alice", Role::Student).await;
        assert!(matches!(result, Err(RoomError::DuplicateIdentity(_))));

        // The original session is untouched.
        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);

        room.cancel();
    }

    #[tokio::test]
    async fn test_join_broadcast_to_others_not_self() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();

        let event = next_event(&mut teacher.events).await;
        match event.event {
            RoomEvent::ParticipantJoined { participant } => {
                assert_eq!(participant.identity, "student");
                assert_eq!(participant.role, Role::Student);
            }
            other => panic!("expected ParticipantJoined, got {other:?}"),
        }

        room.cancel();
    }

    #[tokio::test]
    async fn test_leave_is_idempotent_and_broadcasts() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();
        let _ = next_event(&mut teacher.events).await; // ParticipantJoined

        room.leave("student").await.unwrap();
        let event = next_event(&mut teacher.events).await;
        assert_eq!(
            event.event,
            RoomEvent::ParticipantLeft {
                identity: "student".to_string(),
                reason: LeaveReason::Voluntary,
            }
        );

        // Leaving again (or an unknown identity) is a no-op.
        room.leave("student").await.unwrap();
        room.leave("nobody").await.unwrap();

        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);

        room.cancel();
    }

    #[tokio::test]
    async fn test_hand_raise_toggles_and_touches_nothing_else() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();
        let _ = next_event(&mut teacher.events).await; // ParticipantJoined

        room.raise_hand("student", true).await.unwrap();
        let event = next_event(&mut teacher.events).await;
        assert_eq!(
            event.event,
            RoomEvent::HandStateChanged {
                identity: "student".to_string(),
                raised: true,
            }
        );

        room.raise_hand("student", false).await.unwrap();
        let event = next_event(&mut teacher.events).await;
        assert_eq!(
            event.event,
            RoomEvent::HandStateChanged {
                identity: "student".to_string(),
                raised: false,
            }
        );

        // Roster and polls are untouched.
        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 2);
        assert!(snapshot.active_polls.is_empty());

        let result = room.raise_hand("stranger", true).await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_reaction_broadcast_but_never_persisted() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();
        let _ = next_event(&mut teacher.events).await; // ParticipantJoined

        room.send_reaction("student", "🎉").await.unwrap();
        let event = next_event(&mut teacher.events).await;
        match event.event {
            RoomEvent::ReactionSent { emoji, sender, .. } => {
                assert_eq!(emoji, "🎉");
                assert_eq!(sender, "student");
            }
            other => panic!("expected ReactionSent, got {other:?}"),
        }

        // Nothing about the reaction survives in durable state.
        let snapshot = room.snapshot().await.unwrap();
        assert!(snapshot.active_polls.is_empty());
        assert!(snapshot.participants.iter().all(|p| !p.hand_raised));

        let result = room.send_reaction("stranger", "🎉").await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_moderation_forbidden_for_students() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();
        let _other = room.join("other", Role::Student).await.unwrap();

        let result = room.set_publish_permission("student", "other", false).await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));

        let result = room.remove_participant("student", "other").await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));

        let result = room.end_room("student").await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));

        // Outsiders are forbidden too, even with an instructor's name
        // no longer in the roster.
        let result = room.remove_participant("stranger", "other").await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));

        // Rejected moderation mutated nothing.
        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 3);
        assert!(snapshot.participants.iter().all(|p| p.can_publish));

        room.cancel();
    }

    #[tokio::test]
    async fn test_permission_toggle_flow() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let mut student = room.join("student", Role::Student).await.unwrap();

        room.set_publish_permission("teacher", "student", false)
            .await
            .unwrap();

        let event = next_event(&mut student.events).await;
        assert_eq!(
            event.event,
            RoomEvent::PermissionChanged {
                identity: "student".to_string(),
                can_publish: false,
                changed_by: "teacher".to_string(),
            }
        );

        let snapshot = room.snapshot().await.unwrap();
        let record = snapshot
            .participants
            .iter()
            .find(|p| p.identity == "student")
            .unwrap();
        assert!(!record.can_publish);

        let result = room.set_publish_permission("teacher", "ghost", true).await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_remove_participant_flow() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let mut student = room.join("student", Role::Student).await.unwrap();

        room.remove_participant("teacher", "student").await.unwrap();

        // The removed participant's channel closes (transport sees a
        // disconnect); it does not receive the removal broadcast.
        let gone = tokio::time::timeout(Duration::from_secs(1), student.events.recv())
            .await
            .unwrap();
        assert!(gone.is_none());

        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);

        // Later moderation against the removed identity fails NotFound.
        let result = room.set_publish_permission("teacher", "student", true).await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_poll_scenario_revote_and_close() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();

        let poll = room
            .create_poll(
                "teacher",
                "Confident?",
                vec!["Yes".to_string(), "No".to_string()],
            )
            .await
            .unwrap();

        let tally = room.vote("student", poll.id, 0).await.unwrap();
        assert_eq!(tally.tally, vec![1, 0]);

        // Re-voting overwrites: only the most recent vote counts.
        let tally = room.vote("student", poll.id, 1).await.unwrap();
        assert_eq!(tally.tally, vec![0, 1]);

        let closed = room.close_poll("teacher", poll.id).await.unwrap();
        assert!(!closed.active);
        assert_eq!(closed.tally, vec![0, 1]);

        // Votes behind the close are rejected and change nothing.
        let result = room.vote("student", poll.id, 0).await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));

        let snapshot = room.snapshot().await.unwrap();
        assert!(snapshot.active_polls.is_empty());

        room.cancel();
    }

    #[tokio::test]
    async fn test_poll_authorization_and_validation() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();

        let result = room
            .create_poll("student", "Q?", vec!["A".to_string(), "B".to_string()])
            .await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));

        let result = room.create_poll("teacher", "Q?", vec!["A".to_string()]).await;
        assert!(matches!(result, Err(RoomError::InvalidArgument(_))));

        let poll = room
            .create_poll("teacher", "Q?", vec!["A".to_string(), "B".to_string()])
            .await
            .unwrap();

        let result = room.vote("student", poll.id, 9).await;
        assert!(matches!(result, Err(RoomError::InvalidArgument(_))));

        let result = room.vote("stranger", poll.id, 0).await;
        assert!(matches!(result, Err(RoomError::NotFound(_))));

        let result = room.close_poll("student", poll.id).await;
        assert!(matches!(result, Err(RoomError::Forbidden(_))));

        room.cancel();
    }

    #[tokio::test]
    async fn test_poll_events_fan_out_in_order() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let mut student = room.join("student", Role::Student).await.unwrap();

        let poll = room
            .create_poll(
                "teacher",
                "Confident?",
                vec!["Yes".to_string(), "No".to_string()],
            )
            .await
            .unwrap();
        room.vote("student", poll.id, 0).await.unwrap();
        room.close_poll("teacher", poll.id).await.unwrap();

        // Applied order is observed order: created, tally, closed.
        let event = next_event(&mut student.events).await;
        assert!(matches!(event.event, RoomEvent::PollCreated { .. }));

        let event = next_event(&mut student.events).await;
        match event.event {
            RoomEvent::PollTallyChanged { tally, total_votes, .. } => {
                assert_eq!(tally, vec![1, 0]);
                assert_eq!(total_votes, 1);
            }
            other => panic!("expected PollTallyChanged, got {other:?}"),
        }

        let event = next_event(&mut student.events).await;
        assert!(matches!(event.event, RoomEvent::PollClosed { .. }));

        room.cancel();
    }

    #[tokio::test]
    async fn test_end_room_terminal() {
        let (room, task, mut notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let mut student = room.join("student", Role::Student).await.unwrap();

        room.end_room("teacher").await.unwrap();

        let event = next_event(&mut student.events).await;
        assert_eq!(
            event.event,
            RoomEvent::RoomEnded {
                ended_by: "teacher".to_string(),
            }
        );
        // Then the channel closes: every session is disconnected.
        let gone = tokio::time::timeout(Duration::from_secs(1), student.events.recv())
            .await
            .unwrap();
        assert!(gone.is_none());

        // The actor exits and reports the terminal state.
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        let exited = notify.recv().await.unwrap();
        assert!(matches!(
            exited,
            RegistryMessage::RoomExited { ended: true, .. }
        ));

        // Any further command on the handle fails closed.
        let result = room.join("late", Role::Student).await;
        assert!(matches!(result, Err(RoomError::RoomClosed)));
        let result = room.end_room("teacher").await;
        assert!(matches!(result, Err(RoomError::RoomClosed)));
    }

    #[tokio::test]
    async fn test_slow_receiver_dropped_without_blocking_others() {
        let settings = RoomSettings {
            session_buffer: 2,
            ..RoomSettings::default()
        };
        let (room, _task, _notify) = spawn_room("r1", settings);

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();
        let _ = next_event(&mut teacher.events).await; // ParticipantJoined

        // The student never reads; the teacher keeps draining.
        for _ in 0..3 {
            room.send_reaction("teacher", "👍").await.unwrap();
            let _ = next_event(&mut teacher.events).await;
        }

        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].identity, "teacher");

        // The teacher is told the student is gone.
        let event = next_event(&mut teacher.events).await;
        assert_eq!(
            event.event,
            RoomEvent::ParticipantLeft {
                identity: "student".to_string(),
                reason: LeaveReason::Voluntary,
            }
        );

        room.cancel();
    }

    /// A command that cannot be enqueued within the command timeout
    /// fails `Timeout` instead of queueing behind a wedged room.
    #[tokio::test(start_paused = true)]
    async fn test_saturated_mailbox_fails_timeout() {
        let (sender, _receiver) = mpsc::channel(1);
        let handle = RoomHandle {
            sender,
            cancel_token: CancellationToken::new(),
            room_id: "r1".to_string(),
            command_timeout: Duration::from_millis(50),
        };

        // Fill the only mailbox slot; nothing ever drains it.
        handle.heartbeat("teacher").await.unwrap();

        let result = handle.heartbeat("teacher").await;
        assert!(matches!(result, Err(RoomError::Timeout)));
    }

    /// Heartbeat liveness: a silent session is disconnected after the
    /// configured window, a heartbeating one survives. Uses
    /// `tokio::time::pause()` to control time advancement.
    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_disconnects_silent_session() {
        let (room, _task, _notify) = spawn_room("r1", test_settings());

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        let _student = room.join("student", Role::Student).await.unwrap();
        let _ = next_event(&mut teacher.events).await; // ParticipantJoined

        // Keep the teacher alive, let the student go silent.
        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(10)).await;
            room.heartbeat("teacher").await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snapshot = room.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].identity, "teacher");

        let event = next_event(&mut teacher.events).await;
        assert_eq!(
            event.event,
            RoomEvent::ParticipantLeft {
                identity: "student".to_string(),
                reason: LeaveReason::HeartbeatTimeout,
            }
        );

        room.cancel();
    }

    /// An empty room is reclaimed after the grace period and tells the
    /// registry it did not end.
    #[tokio::test(start_paused = true)]
    async fn test_empty_room_reclaimed_after_grace() {
        let (room, task, mut notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        room.leave("teacher").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Within the grace period the room is still there.
        tokio::time::advance(Duration::from_secs(30)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        // Past it, the room reclaims itself.
        tokio::time::advance(Duration::from_secs(40)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        let exited = notify.recv().await.unwrap();
        assert!(matches!(
            exited,
            RegistryMessage::RoomExited { ended: false, .. }
        ));
    }

    /// Registry-driven cancellation ends the room for its sessions but
    /// is not an instructor end: the exit notification must not claim
    /// one, or the id would tombstone.
    #[tokio::test]
    async fn test_cancelled_room_does_not_report_instructor_end() {
        let (room, task, mut notify) = spawn_room("r1", test_settings());

        let mut teacher = room.join("teacher", Role::Instructor).await.unwrap();
        room.cancel();

        let event = next_event(&mut teacher.events).await;
        assert_eq!(
            event.event,
            RoomEvent::RoomEnded {
                ended_by: "server".to_string(),
            }
        );

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        let exited = notify.recv().await.unwrap();
        assert!(matches!(
            exited,
            RegistryMessage::RoomExited { ended: false, .. }
        ));
    }

    /// A rejoin within the grace period cancels reclamation.
    #[tokio::test(start_paused = true)]
    async fn test_rejoin_resets_empty_grace() {
        let (room, task, _notify) = spawn_room("r1", test_settings());

        let _teacher = room.join("teacher", Role::Instructor).await.unwrap();
        room.leave("teacher").await.unwrap();

        tokio::time::advance(Duration::from_secs(45)).await;
        let _again = room.join("teacher", Role::Instructor).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        room.cancel();
    }
}
