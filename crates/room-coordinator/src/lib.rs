//! Room Coordinator
//!
//! Server-side authority for live session rooms: lifecycle, roster,
//! permissions, polls, hand-raises, reactions, moderation and ordered
//! event fan-out.
//!
//! # Architecture
//!
//! An actor hierarchy keeps every room single-writer:
//!
//! - `RoomRegistryActor` (singleton): room id -> room resolution,
//!   get-or-create, tombstones for ended rooms, dead-task reaping
//! - `RoomActor` (one per room): owns all room state and applies
//!   mutations in mailbox order; the order it applies is the order
//!   every participant observes
//!
//! Participants receive events over bounded per-session channels. A
//! slow or dead receiver is dropped (implicit leave) rather than ever
//! blocking the room.

pub mod actors;
pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod media;
pub mod observability;
pub mod polls;
