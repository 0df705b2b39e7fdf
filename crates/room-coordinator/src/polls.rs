//! Poll engine.
//!
//! `PollBoard` is owned by a `RoomActor` and mutated only from the
//! room's message loop, so it needs no interior locking. Votes are
//! stored per identity (one vote per identity per poll, later votes
//! overwrite) and tallies are derived on read, never stored.
//!
//! Role checks (who may create or close a poll) belong to the room's
//! moderation layer; the board only enforces structural invariants.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::RoomError;

/// A single poll within a room.
#[derive(Debug)]
pub struct Poll {
    /// Poll id, unique within the room.
    pub id: Uuid,
    /// Question text.
    pub question: String,
    /// Ordered answer options, length >= 2.
    pub options: Vec<String>,
    /// Identity -> chosen option index. One vote per identity.
    votes: HashMap<String, usize>,
    /// Whether votes are still accepted.
    pub active: bool,
}

impl Poll {
    /// Derive the per-option vote counts.
    #[must_use]
    pub fn tally(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.options.len()];
        for &index in self.votes.values() {
            if let Some(slot) = counts.get_mut(index) {
                *slot += 1;
            }
        }
        counts
    }

    fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            id: self.id,
            question: self.question.clone(),
            options: self.options.clone(),
            active: self.active,
            tally: self.tally(),
            total_votes: self.votes.len() as u64,
        }
    }
}

/// Wire-facing view of a poll. Exposes the derived tally only, never
/// who voted for what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub id: Uuid,
    pub question: String,
    pub options: Vec<String>,
    pub active: bool,
    pub tally: Vec<u64>,
    pub total_votes: u64,
}

/// All polls of one room, in creation order.
#[derive(Debug, Default)]
pub struct PollBoard {
    polls: Vec<Poll>,
}

impl PollBoard {
    /// Create a new poll and return its snapshot.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the question is blank, fewer than two
    /// options are given, or any option is blank.
    pub fn create(&mut self, question: &str, options: Vec<String>) -> Result<PollSnapshot, RoomError> {
        if question.trim().is_empty() {
            return Err(RoomError::InvalidArgument(
                "poll question must not be empty".to_string(),
            ));
        }
        if options.len() < 2 {
            return Err(RoomError::InvalidArgument(
                "poll needs at least two options".to_string(),
            ));
        }
        if options.iter().any(|o| o.trim().is_empty()) {
            return Err(RoomError::InvalidArgument(
                "poll options must not be empty".to_string(),
            ));
        }

        let poll = Poll {
            id: Uuid::new_v4(),
            question: question.to_string(),
            options,
            votes: HashMap::new(),
            active: true,
        };
        let snapshot = poll.snapshot();
        self.polls.push(poll);
        Ok(snapshot)
    }

    /// Record (or overwrite) `identity`'s vote on an active poll.
    ///
    /// # Errors
    ///
    /// `NotFound` if the poll is unknown or closed, `InvalidArgument`
    /// if the option index is out of range.
    pub fn vote(
        &mut self,
        identity: &str,
        poll_id: Uuid,
        option_index: usize,
    ) -> Result<PollSnapshot, RoomError> {
        let poll = self
            .find_mut(poll_id)
            .ok_or_else(|| RoomError::NotFound("poll not found".to_string()))?;

        if !poll.active {
            // Close is authoritative: in-flight votes after close are rejected.
            return Err(RoomError::NotFound("poll is closed".to_string()));
        }
        if option_index >= poll.options.len() {
            return Err(RoomError::InvalidArgument(
                "option index out of range".to_string(),
            ));
        }

        poll.votes.insert(identity.to_string(), option_index);
        Ok(poll.snapshot())
    }

    /// Close a poll. No further votes are accepted afterwards.
    ///
    /// # Errors
    ///
    /// `NotFound` if the poll is unknown.
    pub fn close(&mut self, poll_id: Uuid) -> Result<PollSnapshot, RoomError> {
        let poll = self
            .find_mut(poll_id)
            .ok_or_else(|| RoomError::NotFound("poll not found".to_string()))?;
        poll.active = false;
        Ok(poll.snapshot())
    }

    /// Snapshots of all polls, in creation order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<PollSnapshot> {
        self.polls.iter().map(Poll::snapshot).collect()
    }

    /// Snapshots of the currently active polls only (rejoin snapshot).
    #[must_use]
    pub fn active_snapshots(&self) -> Vec<PollSnapshot> {
        self.polls
            .iter()
            .filter(|p| p.active)
            .map(Poll::snapshot)
            .collect()
    }

    /// Number of polls ever created in this room.
    #[must_use]
    pub fn len(&self) -> usize {
        self.polls.len()
    }

    /// Whether no poll has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    fn find_mut(&mut self, poll_id: Uuid) -> Option<&mut Poll> {
        self.polls.iter_mut().find(|p| p.id == poll_id)
    }
}
