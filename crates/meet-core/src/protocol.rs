use serde::{Deserialize, Serialize};

/// A participant as carried on the wire and stored in the roster.
///
/// `id` is the stable identity of the participant within a room. `joined_at`
/// is a server-issued timestamp used only for display ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ParticipantRole>,
    pub joined_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Host,
    Guest,
}

/// Inbound presence message from the meeting channel.
///
/// `StateSync` is the reconciliation mechanism: the server sends the full
/// authoritative participant list after any period of uncertainty, and it
/// supersedes all locally accumulated deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ParticipantEvent {
    #[serde(rename = "participant_joined")]
    Joined { participant: Participant },
    #[serde(rename = "participant_left")]
    Left {
        #[serde(rename = "participantId")]
        participant_id: String,
    },
    #[serde(rename = "state_sync")]
    StateSync { participants: Vec<Participant> },
}

/// Keep-alive frame sent while connected. No reply contract; the channel's
/// own close/error is the only death signal.
pub const HEARTBEAT_FRAME: &str = r#"{"type":"ping"}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_participant_joined() {
        let raw = r#"{"type":"participant_joined","participant":{"id":"u1","name":"Alice","joined_at":100}}"#;
        let event: ParticipantEvent = serde_json::from_str(raw).unwrap();
        match event {
            ParticipantEvent::Joined { participant } => {
                assert_eq!(participant.id, "u1");
                assert_eq!(participant.name.as_deref(), Some("Alice"));
                assert_eq!(participant.joined_at, 100);
                assert!(participant.role.is_none());
            }
            other => panic!("expected Joined, got {other:?}"),
        }
    }

    #[test]
    fn parse_participant_left() {
        let raw = r#"{"type":"participant_left","participantId":"u2"}"#;
        let event: ParticipantEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ParticipantEvent::Left {
                participant_id: "u2".to_string()
            }
        );
    }

    #[test]
    fn parse_state_sync() {
        let raw = r#"{"type":"state_sync","participants":[{"id":"u1","joined_at":100},{"id":"u2","avatar_url":null,"role":"host","joined_at":200,"left_at":null}]}"#;
        let event: ParticipantEvent = serde_json::from_str(raw).unwrap();
        match event {
            ParticipantEvent::StateSync { participants } => {
                assert_eq!(participants.len(), 2);
                assert_eq!(participants[1].role, Some(ParticipantRole::Host));
                assert!(participants[1].avatar_url.is_none());
                assert!(participants[1].left_at.is_none());
            }
            other => panic!("expected StateSync, got {other:?}"),
        }
    }

    #[test]
    fn reject_unknown_type() {
        let raw = r#"{"type":"mystery"}"#;
        assert!(serde_json::from_str::<ParticipantEvent>(raw).is_err());
    }

    #[test]
    fn reject_non_json() {
        assert!(serde_json::from_str::<ParticipantEvent>("not json").is_err());
    }

    #[test]
    fn heartbeat_is_valid_json() {
        let value: serde_json::Value = serde_json::from_str(HEARTBEAT_FRAME).unwrap();
        assert_eq!(value["type"], "ping");
    }
}
