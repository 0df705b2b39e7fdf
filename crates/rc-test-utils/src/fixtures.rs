//! Spawning and event-stream helpers for coordinator tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use room_coordinator::actors::{
    ActorMetrics, RoomRegistryActor, RoomRegistryHandle, RoomSettings,
};
use room_coordinator::events::EventEnvelope;
use room_coordinator::media::SharedMediaControl;

use crate::mock_media::RecordingMediaControl;

/// Default timeout for waiting on an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(1);

/// A spawned coordinator actor system wired with test doubles.
pub struct TestCoordinator {
    pub registry: RoomRegistryHandle,
    pub registry_task: JoinHandle<()>,
    pub metrics: Arc<ActorMetrics>,
    pub media: Arc<RecordingMediaControl>,
}

impl TestCoordinator {
    /// Spawn a coordinator with default settings and a recording media
    /// mock.
    #[must_use]
    pub fn spawn() -> Self {
        Self::with_settings(RoomSettings::default())
    }

    /// Spawn a coordinator with custom room settings.
    #[must_use]
    pub fn with_settings(settings: RoomSettings) -> Self {
        let media = RecordingMediaControl::shared();
        let metrics = ActorMetrics::new();
        let (registry, registry_task) = RoomRegistryActor::spawn(
            "rc-test".to_string(),
            settings,
            Arc::clone(&media) as SharedMediaControl,
            Arc::clone(&metrics),
        );
        Self {
            registry,
            registry_task,
            metrics,
            media,
        }
    }
}

impl Drop for TestCoordinator {
    fn drop(&mut self) {
        self.registry.cancel();
    }
}

/// Receive the next event from a session stream, panicking after
/// [`EVENT_TIMEOUT`].
///
/// # Panics
///
/// Panics if the stream closes or no event arrives in time.
pub async fn next_event(rx: &mut mpsc::Receiver<Arc<EventEnvelope>>) -> EventEnvelope {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .map(|e| (*e).clone())
        .expect("event channel closed")
}

/// Assert a session stream is closed (the participant was disconnected).
///
/// # Panics
///
/// Panics if the stream stays open past [`EVENT_TIMEOUT`].
pub async fn expect_closed(rx: &mut mpsc::Receiver<Arc<EventEnvelope>>) {
    loop {
        let next = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("stream did not close in time");
        if next.is_none() {
            return;
        }
        // Drain broadcasts queued before the disconnect.
    }
}

/// Poll the registry until it reports the expected room count.
///
/// # Panics
///
/// Panics if the count is not reached within a second.
pub async fn wait_for_room_count(registry: &RoomRegistryHandle, expected: usize) {
    for _ in 0..100 {
        let status = registry.status().await.expect("registry unavailable");
        if status.room_count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never reached room_count {expected}");
}
