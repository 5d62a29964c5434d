//! On-disk schema. Field names match the snapshot files written by earlier
//! deployments (`nextMsgId`, `created_at`, `userId`, `passwordHash`, ...).
//!
//! Fields this crate does not model (profile settings on users, for example)
//! are kept in each record's `extra` map and written back unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: u64,
    pub content: String,
    /// Milliseconds since the Unix epoch on disk
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Recipient for direct messages; absent for public feed posts
    #[serde(
        rename = "userId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_user_id: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    pub password_hash: String,
    pub recipient_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn first_id() -> u64 {
    1
}

/// The unit of persistence. Messages are kept newest-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "nextMsgId", default = "first_id")]
    pub next_message_id: u64,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "first_id")]
    pub next_user_id: u64,
    #[serde(default)]
    pub users: Vec<User>,
    /// Legacy session map. Carried through untouched, never read.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub tokens: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            next_message_id: 1,
            messages: Vec::new(),
            next_user_id: 1,
            users: Vec::new(),
            tokens: Map::new(),
            extra: Map::new(),
        }
    }
}

impl Snapshot {
    /// Bump the id counters past any id already present, so a hand-edited or
    /// partially written file can never cause id reuse.
    pub fn normalize(&mut self) -> bool {
        let mut changed = false;
        if let Some(max) = self.messages.iter().map(|m| m.id).max() {
            if self.next_message_id <= max {
                self.next_message_id = max + 1;
                changed = true;
            }
        }
        if let Some(max) = self.users.iter().map(|u| u.id).max() {
            if self.next_user_id <= max {
                self.next_user_id = max + 1;
                changed = true;
            }
        }
        changed
    }
}
