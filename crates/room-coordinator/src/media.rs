//! Boundary to the external media/transport provider (e.g. an SFU).
//!
//! The coordinator never negotiates or relays media. The only call it
//! makes into the media layer is forcing disconnection of a removed
//! participant's stream; everything else about media is out of scope.

use std::sync::Arc;

use tracing::debug;

/// Hook into the media provider for forced disconnects.
///
/// Implementations must not block: the room actor invokes this on its
/// message loop. Fire-and-forget implementations should spawn their own
/// tasks for any network work.
pub trait MediaControl: Send + Sync {
    /// Force-disconnect `identity`'s media stream in `room_id`.
    fn force_disconnect(&self, room_id: &str, identity: &str);
}

/// Default implementation for deployments without an SFU callback.
#[derive(Debug, Default)]
pub struct NoopMediaControl;

impl MediaControl for NoopMediaControl {
    fn force_disconnect(&self, room_id: &str, identity: &str) {
        debug!(
            target: "rc.media",
            room_id = %room_id,
            identity = %identity,
            "No media provider configured, skipping forced disconnect"
        );
    }
}

/// Shared handle type used throughout the actor system.
pub type SharedMediaControl = Arc<dyn MediaControl>;
