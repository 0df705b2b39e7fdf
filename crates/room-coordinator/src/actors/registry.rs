//! `RoomRegistryActor` - singleton actor that owns the room table.
//!
//! The registry maps room ids to running `RoomActor`s. Resolution is
//! get-or-create: concurrent requests for the same id serialize through
//! the registry mailbox, so exactly one actor ever exists per id. Ended
//! rooms leave a tombstone behind; their ids resolve to `RoomClosed`
//! instead of silently resurrecting. Idle-reclaimed rooms leave no
//! tombstone and may be created again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle, RoomSettings};
use crate::errors::RoomError;
use crate::media::SharedMediaControl;

/// Channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 500;

/// How often the registry sweeps for dead room tasks.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// How long a room gets to stop during graceful shutdown.
const SHUTDOWN_ROOM_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for the registry mailbox.
const REGISTRY_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Handle to the `RoomRegistryActor`.
#[derive(Debug, Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Resolve the room for `room_id`, creating it if absent.
    ///
    /// Fails with `RoomClosed` for ended room ids and during shutdown,
    /// and with `InvalidArgument` for a blank id.
    pub async fn get_or_create(&self, room_id: impl Into<String>) -> Result<RoomHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetOrCreate {
            room_id: room_id.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Resolve an existing room only.
    pub async fn get(&self, room_id: impl Into<String>) -> Result<RoomHandle, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Get {
            room_id: room_id.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Cancel and reap a room. Succeeds for absent ids.
    pub async fn remove(&self, room_id: impl Into<String>) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Remove {
            room_id: room_id.into(),
            respond_to: tx,
        })
        .await?;
        self.recv(rx).await?
    }

    /// Point-in-time registry status.
    pub async fn status(&self) -> Result<RegistryStatus, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;
        self.recv(rx).await
    }

    /// Gracefully shut down the registry and every room it owns.
    ///
    /// Resolves once every room has stopped (or timed out stopping).
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Shutdown { respond_to: tx })
            .await?;
        self.recv(rx).await?
    }

    /// Cancel the registry actor without waiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), RoomError> {
        match tokio::time::timeout(REGISTRY_COMMAND_TIMEOUT, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RoomError::RoomClosed),
            Err(_) => Err(RoomError::Timeout),
        }
    }

    async fn recv<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, RoomError> {
        rx.await.map_err(|_| RoomError::RoomClosed)
    }
}

/// A room under registry management.
struct ManagedRoom {
    handle: RoomHandle,
    task_handle: JoinHandle<()>,
    created_at: Instant,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    coordinator_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Cloned into every room for exit notifications.
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<String, ManagedRoom>,
    /// Ids of rooms that ended. Joins against these fail `RoomClosed`.
    ended: HashSet<String>,
    /// Cleared once shutdown begins.
    accepting_new: bool,
    settings: RoomSettings,
    media: SharedMediaControl,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    /// Spawn the registry actor.
    pub fn spawn(
        coordinator_id: String,
        settings: RoomSettings,
        media: SharedMediaControl,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomRegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = Self {
            coordinator_id: coordinator_id.clone(),
            receiver,
            sender: sender.clone(),
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            ended: HashSet::new(),
            accepting_new: true,
            settings,
            media,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, coordinator_id),
        };

        let task_handle = tokio::spawn(actor.run());

        (
            RoomRegistryHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Run the registry message loop.
    #[instrument(skip_all, name = "rc.actor.registry", fields(coordinator_id = %self.coordinator_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            "RoomRegistryActor started"
        );

        let mut health_check = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = health_check.tick() => {
                    self.check_room_health();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(RegistryMessage::Shutdown { respond_to }) => {
                            self.graceful_shutdown().await;
                            let _ = respond_to.send(Ok(()));
                            break;
                        }
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rc.actor.registry",
                                coordinator_id = %self.coordinator_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreate {
                room_id,
                respond_to,
            } => {
                let result = self.handle_get_or_create(room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Get {
                room_id,
                respond_to,
            } => {
                let result = self.handle_get(&room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Remove {
                room_id,
                respond_to,
            } => {
                self.handle_remove(&room_id);
                let _ = respond_to.send(Ok(()));
            }

            RegistryMessage::RoomExited { room_id, ended } => {
                self.handle_room_exited(&room_id, ended);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(RegistryStatus {
                    room_count: self.rooms.len(),
                    session_count: self.metrics.session_count(),
                    accepting_new: self.accepting_new,
                    mailbox_depth: self.mailbox.current_depth(),
                });
            }

            // Handled inline in the run loop so it can break.
            RegistryMessage::Shutdown { respond_to } => {
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    /// Resolve or create a room.
    #[instrument(skip_all, fields(coordinator_id = %self.coordinator_id, room_id = %room_id))]
    fn handle_get_or_create(&mut self, room_id: String) -> Result<RoomHandle, RoomError> {
        if room_id.trim().is_empty() {
            return Err(RoomError::InvalidArgument(
                "room id must not be empty".to_string(),
            ));
        }
        if !self.accepting_new {
            return Err(RoomError::RoomClosed);
        }
        // An ended room stays ended. Idle-reclaimed ids are not here
        // and fall through to re-creation.
        if self.ended.contains(&room_id) {
            return Err(RoomError::RoomClosed);
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
            // The task died without an exit notification. Reap and
            // recreate below.
            self.reap_dead_room(&room_id);
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            self.cancel_token.child_token(),
            self.settings.clone(),
            Arc::clone(&self.media),
            self.sender.clone(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: Instant::now(),
            },
        );
        self.metrics.room_created();

        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(handle)
    }

    fn handle_get(&self, room_id: &str) -> Result<RoomHandle, RoomError> {
        if let Some(managed) = self.rooms.get(room_id) {
            return Ok(managed.handle.clone());
        }
        if self.ended.contains(room_id) {
            return Err(RoomError::RoomClosed);
        }
        Err(RoomError::RoomNotFound(room_id.to_string()))
    }

    /// Cancel and reap a room. No-op for absent ids.
    fn handle_remove(&mut self, room_id: &str) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };
        self.metrics.room_removed();
        managed.handle.cancel();

        let uptime = managed.created_at.elapsed();
        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_id = %room_id,
            uptime_seconds = uptime.as_secs(),
            "Room removed"
        );

        // Wait for the task off the registry loop.
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            if managed.task_handle.await.is_err() {
                metrics.record_panic(ActorType::Room);
            }
        });
    }

    /// Reap a room entry after its actor exited on its own.
    fn handle_room_exited(&mut self, room_id: &str, ended: bool) {
        if self.rooms.remove(room_id).is_some() {
            self.metrics.room_removed();
        }
        if ended {
            self.ended.insert(room_id.to_string());
        }

        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_id = %room_id,
            ended = ended,
            total_rooms = self.rooms.len(),
            "Room exited"
        );
    }

    /// Reap rooms whose tasks finished without an exit notification.
    /// A finished task still in the table usually means a panic.
    fn check_room_health(&mut self) {
        let dead: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in dead {
            warn!(
                target: "rc.actor.registry",
                coordinator_id = %self.coordinator_id,
                room_id = %room_id,
                "Room task finished without exit notification, reaping"
            );
            self.reap_dead_room(&room_id);
        }
    }

    fn reap_dead_room(&mut self, room_id: &str) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };
        self.metrics.room_removed();

        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            if managed.task_handle.await.is_err() {
                metrics.record_panic(ActorType::Room);
            }
        });
    }

    /// Stop accepting new rooms, cancel every room and wait for each to
    /// stop.
    async fn graceful_shutdown(&mut self) {
        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            rooms = self.rooms.len(),
            "Registry graceful shutdown started"
        );
        self.accepting_new = false;

        let rooms: Vec<(String, ManagedRoom)> = self.rooms.drain().collect();
        for (_, managed) in &rooms {
            managed.handle.cancel();
        }

        for (room_id, managed) in rooms {
            self.metrics.room_removed();
            match tokio::time::timeout(SHUTDOWN_ROOM_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => self.metrics.record_panic(ActorType::Room),
                Err(_) => {
                    warn!(
                        target: "rc.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        room_id = %room_id,
                        "Room did not stop within shutdown timeout"
                    );
                }
            }
        }

        info!(
            target: "rc.actor.registry",
            coordinator_id = %self.coordinator_id,
            "Registry graceful shutdown complete"
        );
    }
}
