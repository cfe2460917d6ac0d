use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A two-party messaging thread. Unique per unordered participant pair and
/// immutable once created; conversations are never deleted in normal
/// operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub participant_a: Uuid,
    pub participant_b: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }

    /// The counterpart of `user_id` in this conversation.
    pub fn other_participant(&self, user_id: Uuid) -> Uuid {
        if self.participant_a == user_id {
            self.participant_b
        } else {
            self.participant_a
        }
    }
}

/// A persisted message. Append-only: no edits or deletes.
///
/// `seq` is the store's insertion sequence and breaks `created_at` ties so
/// ordering is stable end to end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub seq: u64,
}

impl Message {
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.created_at, self.seq)
    }
}

/// A member profile, read-only from the messaging core's perspective. Used
/// to resolve the counterpart's display name and avatar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Display name for a profile, degrading to a placeholder so a failed
/// profile lookup never blocks rendering a conversation entry.
pub fn display_name(profile: Option<&Profile>) -> String {
    let Some(profile) = profile else {
        return "Unknown User".to_string();
    };

    match (&profile.first_name, &profile.last_name) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        (Some(first), None) => first.clone(),
        (None, Some(last)) => last.clone(),
        (None, None) => "Unknown User".to_string(),
    }
}

/// Avatar initials for a profile (max 2 characters).
pub fn initials(profile: Option<&Profile>) -> String {
    let Some(profile) = profile else {
        return "??".to_string();
    };

    match (&profile.first_name, &profile.last_name) {
        (Some(first), Some(last)) => {
            let mut out = String::new();
            out.extend(first.chars().next());
            out.extend(last.chars().next());
            out.to_uppercase()
        }
        (Some(first), _) => first.chars().take(2).collect::<String>().to_uppercase(),
        _ => "??".to_string(),
    }
}
