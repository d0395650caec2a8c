use serde::Deserialize;
use url::Url;

use crate::errors::MeetError;

/// Meeting record as returned by the backend REST API.
///
/// Used to pre-seed a roster before the presence channel has delivered any
/// event (see [`crate::roster::Roster::seed_from_snapshot`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MeetingSnapshot {
    #[serde(default)]
    pub participants: Vec<SnapshotParticipant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotParticipant {
    pub id: String,
    pub user_id: u64,
    pub joined_at: u64,
    #[serde(default)]
    pub left_at: Option<u64>,
}

/// Fetches meeting records from the backend REST API.
pub struct MeetingApi;

impl MeetingApi {
    /// GET `<backend>/meeting/<roomId>` and deserialize the meeting record.
    ///
    /// Authentication rides on the HTTP layer (cookies/bearer); this call
    /// carries nothing extra.
    pub async fn fetch_meeting(
        backend_url: &str,
        room_id: &str,
    ) -> Result<MeetingSnapshot, MeetError> {
        let raw = format!("{}/meeting/{}", backend_url.trim_end_matches('/'), room_id);
        let url = Url::parse(&raw)
            .map_err(|e| MeetError::InvalidEnvironment(format!("bad backend URL '{raw}': {e}")))?;

        tracing::debug!("fetching meeting snapshot: {url}");

        let resp = reqwest::get(url)
            .await
            .map_err(|e| MeetError::Http(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(MeetError::AuthRequired(format!(
                "meeting API returned status {status}"
            )));
        }
        if !status.is_success() {
            return Err(MeetError::Http(format!(
                "meeting API returned status {status}"
            )));
        }

        resp.json()
            .await
            .map_err(|e| MeetError::Http(format!("invalid meeting response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_snapshot() {
        let raw = r#"{"participants":[
            {"id":"p1","user_id":42,"joined_at":100},
            {"id":"p2","user_id":7,"joined_at":200,"left_at":250}
        ]}"#;
        let snapshot: MeetingSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.participants.len(), 2);
        assert_eq!(snapshot.participants[0].user_id, 42);
        assert_eq!(snapshot.participants[0].left_at, None);
        assert_eq!(snapshot.participants[1].left_at, Some(250));
    }

    #[test]
    fn deserialize_meeting_without_participants_field() {
        let snapshot: MeetingSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.participants.is_empty());
    }
}
