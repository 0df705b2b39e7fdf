//! Recording mock for the media control seam.

use std::sync::{Arc, Mutex};

use room_coordinator::media::MediaControl;

/// `MediaControl` implementation that records every forced disconnect
/// so tests can assert the media provider was told to tear a stream
/// down.
#[derive(Debug, Default)]
pub struct RecordingMediaControl {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingMediaControl {
    /// Create a shared instance suitable for handing to the registry.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// All `(room_id, identity)` pairs disconnected so far, in order.
    #[must_use]
    pub fn disconnect_calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }

    /// Whether a specific participant was force-disconnected.
    #[must_use]
    pub fn was_disconnected(&self, room_id: &str, identity: &str) -> bool {
        self.disconnect_calls()
            .iter()
            .any(|(r, i)| r == room_id && i == identity)
    }
}

impl MediaControl for RecordingMediaControl {
    fn force_disconnect(&self, room_id: &str, identity: &str) {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push((room_id.to_string(), identity.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls_in_order() {
        let media = RecordingMediaControl::shared();

        media.force_disconnect("r1", "alice");
        media.force_disconnect("r2", "bob");

        assert!(media.was_disconnected("r1", "alice"));
        assert!(!media.was_disconnected("r1", "bob"));
        assert_eq!(
            media.disconnect_calls(),
            vec![
                ("r1".to_string(), "alice".to_string()),
                ("r2".to_string(), "bob".to_string()),
            ]
        );
    }
}
