//! Saved text entries and their delivery state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A short text entry saved by a user, delivered back at most once per
/// send. `sent=true` implies `sent_at` is set and `scheduled_for` is
/// cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub user_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_via: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(user_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            body: body.into(),
            created_at: Utc::now(),
            sent: false,
            sent_at: None,
            delivered_via: None,
            scheduled_for: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_is_unsent() {
        let entry = Entry::new("u1", "the lake at dawn");
        assert!(!entry.sent);
        assert!(entry.sent_at.is_none());
        assert!(entry.delivered_via.is_none());
        assert_eq!(entry.user_id, "u1");
    }

    #[test]
    fn test_entry_json_roundtrip() {
        let entry = Entry::new("u1", "first snow");
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, entry.id);
        assert_eq!(parsed.body, "first snow");
        assert!(!parsed.sent);
    }
}
