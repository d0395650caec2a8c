//! Meeting client connection core.
//!
//! Pure Rust crate with no UI dependencies: the reconnecting presence
//! channel, its backoff policy, and the per-room participant roster.
//! Consumed by UI shells through the event listener interface.

pub mod api;
pub mod auth;
pub mod backoff;
pub mod connection;
pub mod errors;
pub mod events;
pub mod protocol;
pub mod roster;
pub mod transport;

pub use auth::AuthGate;
pub use backoff::{BackoffOptions, BackoffPolicy};
pub use connection::{ConnectionConfig, MeetingConnection};
pub use errors::MeetError;
pub use events::{ConnectionState, MeetEvent, MeetEventListener};
pub use protocol::{Participant, ParticipantEvent, ParticipantRole};
pub use roster::{Roster, RosterRegistry};
pub use transport::{Transport, WsTransport};
