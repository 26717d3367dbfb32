//! Comment records.
//!
//! Field names on the wire follow the hosted collection's layout (camelCase,
//! text stored under `comment`), so the serde renames here are load-bearing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author_user_id: String,
    /// Snapshot of the author's email at creation time.
    pub author_email: String,
    #[serde(rename = "comment")]
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Whether `user_id` is the author. Used as the UI gate for edit/delete.
    pub fn is_authored_by(&self, user_id: &str) -> bool {
        self.author_user_id == user_id
    }
}

/// Payload for creating a comment.
///
/// `id` is generated client-side and doubles as the idempotency key: writing
/// the same `NewComment` twice leaves a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub id: String,
    pub author_user_id: String,
    pub author_email: String,
    pub text: String,
}

impl NewComment {
    pub fn new(
        author_user_id: impl Into<String>,
        text: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            author_user_id: author_user_id.into(),
            author_email: author_email.into(),
            text: text.into(),
        }
    }
}
