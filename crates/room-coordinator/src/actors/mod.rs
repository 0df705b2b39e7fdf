//! Actor system for the room coordinator.
//!
//! Two actor layers:
//!
//! - `RoomRegistryActor` (singleton): owns the room table, resolves
//!   room ids get-or-create, tombstones ended rooms, reaps dead tasks
//! - `RoomActor` (one per room): owns roster, permissions, polls and
//!   hand state; serializes every mutation; fans events out to bounded
//!   per-session channels
//!
//! All communication goes through message passing. No locks are shared
//! between actors; each piece of state has exactly one writer.

pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;
pub mod session;

pub use messages::{JoinResult, RegistryStatus};
pub use metrics::ActorMetrics;
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomHandle, RoomSettings};
pub use session::{DeliveryError, ParticipantSession, SessionSender};
