use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::api::MeetingSnapshot;
use crate::protocol::{Participant, ParticipantEvent};

/// Participant roster for one room.
///
/// Updated by the connection event loop. Read by UI layers. Join and leave
/// are idempotent so duplicate or late delivery never corrupts the roster;
/// `state_sync` replaces everything and is the reconciliation mechanism for
/// missed deltas.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    participants: HashMap<String, Participant>,
    events_seen: bool,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_event(&mut self, event: ParticipantEvent) {
        self.events_seen = true;
        match event {
            ParticipantEvent::Joined { participant } => {
                // Duplicate join delivery: keep the record we already have.
                self.participants
                    .entry(participant.id.clone())
                    .or_insert(participant);
            }
            ParticipantEvent::Left { participant_id } => {
                self.participants.remove(&participant_id);
            }
            ParticipantEvent::StateSync { participants } => {
                self.participants = participants
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect();
            }
        }
    }

    /// Seed the roster from a REST meeting snapshot.
    ///
    /// Only applies while no live event has been received; a snapshot must
    /// never clobber event-derived state. Returns whether it applied.
    pub fn seed_from_snapshot(&mut self, snapshot: &MeetingSnapshot) -> bool {
        if self.events_seen {
            tracing::debug!("snapshot ignored: roster already has live event state");
            return false;
        }
        if snapshot.participants.is_empty() {
            return false;
        }
        self.participants = snapshot
            .participants
            .iter()
            .map(|p| {
                let participant = Participant {
                    id: p.id.clone(),
                    name: Some(format!("User {}", p.user_id)),
                    avatar_url: None,
                    role: None,
                    joined_at: p.joined_at,
                    left_at: p.left_at,
                };
                (participant.id.clone(), participant)
            })
            .collect();
        true
    }

    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn count(&self) -> usize {
        self.participants.len()
    }

    /// Participants in join order. Ties break on id so the order is stable.
    pub fn sorted_participants(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn reset(&mut self) {
        self.participants.clear();
        self.events_seen = false;
    }
}

pub type SharedRoster = Arc<Mutex<Roster>>;

/// Explicit per-room roster store.
///
/// Rooms are created on demand and must be disposed when the room is left;
/// nothing here outlives its room implicitly.
#[derive(Default)]
pub struct RosterRegistry {
    rosters: std::sync::Mutex<HashMap<String, SharedRoster>>,
}

impl RosterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, room_id: &str) -> SharedRoster {
        self.rosters
            .lock()
            .unwrap()
            .entry(room_id.to_string())
            .or_default()
            .clone()
    }

    pub fn dispose(&self, room_id: &str) {
        self.rosters.lock().unwrap().remove(room_id);
    }

    pub fn room_count(&self) -> usize {
        self.rosters.lock().unwrap().len()
    }
}
