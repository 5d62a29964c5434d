//! # Storage Module - Durable Snapshot Store
//!
//! Holds every message and user in memory and mirrors each mutation to a single
//! JSON snapshot file before reporting success.
//!
//! ## Write path
//!
//! All mutations go through one async mutex that owns the in-memory snapshot:
//!
//! 1. take the mutex, then the `.lock` sidecar ([`atomic::lock_exclusive`])
//! 2. reload the snapshot file, so writes made by other handles or processes are seen
//! 3. apply the change to a copy of that snapshot
//! 4. serialize the copy and atomically replace the file ([`atomic::replace_file`])
//! 5. only then swap the copy in as the live snapshot and release the lock
//!
//! Writers are therefore serialized across tasks and processes (no lost updates,
//! no id reuse), and a failed write leaves the file at its previous state.
//!
//! Reads serve the live snapshot, which reflects this handle's last load or
//! write; call [`Store::refresh`] to pick up writes made elsewhere.
//!
//! ## Load
//!
//! Opening a store never fails because of the snapshot itself: a missing file
//! starts empty, and an unreadable or malformed one is logged, moved aside as
//! `<file>.corrupt-<timestamp>` and replaced by an empty snapshot.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use postbox::config::StorageConfig;
//! use postbox::storage::Store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Store::open(&StorageConfig::in_dir("./data")).await?;
//!     let id = store.add_message("Hello, feed!", None).await?;
//!     let latest = store.get_messages(10).await;
//!     assert_eq!(latest[0].id, id);
//!     Ok(())
//! }
//! ```
//!
//! Callers validate input (content length, username length) before calling in;
//! the store only enforces uniqueness.

pub mod atomic;
mod snapshot;

pub use snapshot::{Message, Snapshot, User};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::logutil::escape_log;
use crate::metrics;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("recipient id '{0}' is already in use")]
    RecipientTaken(String),

    #[error("recipient '{0}' not found")]
    RecipientNotFound(String),

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to persist snapshot to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Declined operations, as opposed to storage failures.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::UsernameTaken(_) | StoreError::RecipientTaken(_)
        )
    }
}

/// Where a new message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressee<'a> {
    /// Public feed post, no owner
    Feed,
    /// Direct message to a known user id
    User(u64),
    /// Direct message to the user owning this recipient id
    Recipient(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub messages: usize,
    pub users: usize,
    pub next_message_id: u64,
    pub next_user_id: u64,
}

/// Guard against any accidental leading NULs before decoding.
fn parse(raw: &str) -> serde_json::Result<Snapshot> {
    serde_json::from_str(raw.trim_start_matches('\0'))
}

pub struct Store {
    path: PathBuf,
    max_messages: usize,
    snapshot: Mutex<Snapshot>,
}

impl Store {
    /// Open (or start) the store described by `config`. Fails only if the data
    /// directory cannot be created.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)
            .await
            .map_err(|e| anyhow!("Failed to create data directory {}: {}", config.data_dir, e))?;
        let path = config.store_path();
        let snapshot = Self::load(&path).await;
        Ok(Store {
            path,
            max_messages: config.max_messages.max(1),
            snapshot: Mutex::new(snapshot),
        })
    }

    async fn load(path: &Path) -> Snapshot {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No snapshot at {}; starting with an empty store", path.display());
                return Snapshot::default();
            }
            Err(e) => {
                metrics::inc_load_fallbacks();
                error!(
                    "Snapshot {} unreadable ({}); starting with an empty store",
                    path.display(),
                    e
                );
                return Snapshot::default();
            }
        };

        match parse(&raw) {
            Ok(mut snap) => {
                if snap.normalize() {
                    warn!(
                        "Snapshot {} had stale id counters; advanced to msg={} user={}",
                        path.display(),
                        snap.next_message_id,
                        snap.next_user_id
                    );
                }
                info!(
                    "Loaded {} messages and {} users from {}",
                    snap.messages.len(),
                    snap.users.len(),
                    path.display()
                );
                snap
            }
            Err(e) => {
                metrics::inc_load_fallbacks();
                error!(
                    "Snapshot {} is malformed ({}); starting with an empty store",
                    path.display(),
                    e
                );
                let stamp = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
                match atomic::quarantine(path, &stamp) {
                    Ok(moved) => warn!("Moved malformed snapshot to {}", moved.display()),
                    Err(e) => warn!("Could not move malformed snapshot aside: {}", e),
                }
                Snapshot::default()
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    fn persist_error(&self, source: std::io::Error) -> StoreError {
        metrics::inc_persist_failures();
        error!("Failed to persist snapshot {}: {}", self.path.display(), source);
        StoreError::Persist {
            path: self.path.clone(),
            source,
        }
    }

    async fn lock_file(&self) -> Result<std::fs::File, StoreError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic::lock_exclusive(&path))
            .await
            .unwrap_or_else(|join| Err(std::io::Error::new(ErrorKind::Other, join.to_string())))
            .map_err(|source| self.persist_error(source))
    }

    async fn persist(&self, snap: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snap)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic::replace_file(&path, &bytes))
            .await
            .unwrap_or_else(|join| Err(std::io::Error::new(ErrorKind::Other, join.to_string())))
            .map_err(|source| self.persist_error(source))
    }

    /// The snapshot as currently on disk. `None` when there is no usable file,
    /// in which case the caller keeps its in-memory copy.
    async fn read_current(&self) -> Option<Snapshot> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Could not reload {} ({}); using in-memory copy", self.path.display(), e);
                return None;
            }
        };
        match parse(&raw) {
            Ok(mut snap) => {
                snap.normalize();
                Some(snap)
            }
            Err(e) => {
                warn!("Snapshot {} is malformed ({}); using in-memory copy", self.path.display(), e);
                None
            }
        }
    }

    /// Reload the live snapshot from disk.
    pub async fn refresh(&self) {
        let mut live = self.snapshot.lock().await;
        if let Some(snap) = self.read_current().await {
            *live = snap;
        }
    }

    /// Reload under the file lock, apply `change` to a copy, persist it, then publish it.
    async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut live = self.snapshot.lock().await;
        let _lock = self.lock_file().await?;
        if let Some(current) = self.read_current().await {
            *live = current;
        }
        let mut next = live.clone();
        let out = change(&mut next)?;
        self.persist(&next).await?;
        *live = next;
        Ok(out)
    }

    /// Store a message (public when `owner_user_id` is `None`) and return its id.
    pub async fn add_message(&self, content: &str, owner_user_id: Option<u64>) -> Result<u64, StoreError> {
        let to = owner_user_id.map_or(Addressee::Feed, Addressee::User);
        Ok(self.insert_message(content, to).await?.id)
    }

    /// Store a direct message for the user behind `recipient_id`.
    pub async fn add_message_to_recipient(&self, recipient_id: &str, content: &str) -> Result<u64, StoreError> {
        Ok(self
            .insert_message(content, Addressee::Recipient(recipient_id))
            .await?
            .id)
    }

    /// Store a message and return it as persisted.
    pub async fn insert_message(&self, content: &str, to: Addressee<'_>) -> Result<Message, StoreError> {
        let max = self.max_messages;
        let message = self
            .mutate(|snap| {
                let owner = match to {
                    Addressee::Feed => None,
                    Addressee::User(id) => Some(id),
                    Addressee::Recipient(recipient_id) => Some(
                        snap.users
                            .iter()
                            .find(|u| u.recipient_id == recipient_id)
                            .map(|u| u.id)
                            .ok_or_else(|| StoreError::RecipientNotFound(recipient_id.to_string()))?,
                    ),
                };
                let message = Message {
                    id: snap.next_message_id,
                    content: content.to_string(),
                    created_at: Utc::now(),
                    owner_user_id: owner,
                    extra: Default::default(),
                };
                snap.next_message_id += 1;
                snap.messages.insert(0, message.clone());
                snap.messages.truncate(max);
                Ok(message)
            })
            .await?;
        metrics::inc_messages_stored();
        debug!(
            "Stored message id={} owner={:?} content=\"{}\"",
            message.id,
            message.owner_user_id,
            escape_log(&message.content)
        );
        Ok(message)
    }

    /// Up to `limit` most recent messages of any kind, newest first.
    pub async fn get_messages(&self, limit: usize) -> Vec<Message> {
        let snap = self.snapshot.lock().await;
        snap.messages.iter().take(limit).cloned().collect()
    }

    /// Up to `limit` most recent messages addressed to `user_id`, newest first.
    pub async fn get_messages_for_user(&self, user_id: u64, limit: usize) -> Vec<Message> {
        let snap = self.snapshot.lock().await;
        snap.messages
            .iter()
            .filter(|m| m.owner_user_id == Some(user_id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_message_by_id(&self, id: u64) -> Option<Message> {
        let snap = self.snapshot.lock().await;
        snap.messages.iter().find(|m| m.id == id).cloned()
    }

    /// Create a user. Usernames are compared case-sensitively; recipient ids must
    /// also be unique.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        recipient_id: &str,
    ) -> Result<User, StoreError> {
        let user = self
            .mutate(|snap| {
                if snap.users.iter().any(|u| u.username == username) {
                    return Err(StoreError::UsernameTaken(username.to_string()));
                }
                if snap.users.iter().any(|u| u.recipient_id == recipient_id) {
                    return Err(StoreError::RecipientTaken(recipient_id.to_string()));
                }
                let user = User {
                    id: snap.next_user_id,
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                    recipient_id: recipient_id.to_string(),
                    extra: Default::default(),
                };
                snap.next_user_id += 1;
                snap.users.push(user.clone());
                Ok(user)
            })
            .await?;
        metrics::inc_users_created();
        info!("Created user id={} username={}", user.id, escape_log(&user.username));
        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<User> {
        let snap = self.snapshot.lock().await;
        snap.users.iter().find(|u| u.username == username).cloned()
    }

    pub async fn get_user_by_id(&self, id: u64) -> Option<User> {
        let snap = self.snapshot.lock().await;
        snap.users.iter().find(|u| u.id == id).cloned()
    }

    pub async fn get_user_by_recipient_id(&self, recipient_id: &str) -> Option<User> {
        let snap = self.snapshot.lock().await;
        snap.users.iter().find(|u| u.recipient_id == recipient_id).cloned()
    }

    pub async fn stats(&self) -> StoreStats {
        let snap = self.snapshot.lock().await;
        StoreStats {
            messages: snap.messages.len(),
            users: snap.users.len(),
            next_message_id: snap.next_message_id,
            next_user_id: snap.next_user_id,
        }
    }

    /// Copy of the live snapshot.
    pub async fn export(&self) -> Snapshot {
        self.snapshot.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store_in(dir: &TempDir, max: usize) -> Store {
        let cfg = StorageConfig {
            max_messages: max,
            ..StorageConfig::in_dir(dir.path().to_str().unwrap())
        };
        Store::open(&cfg).await.unwrap()
    }

    #[tokio::test]
    async fn test_ids_increase_and_feed_is_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 100).await;
        let a = store.add_message("one", None).await.unwrap();
        let b = store.add_message("two", None).await.unwrap();
        assert_eq!((a, b), (1, 2));
        let feed = store.get_messages(10).await;
        assert_eq!(feed.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(store.get_messages(1).await.len(), 1);
        assert_eq!(store.get_message_by_id(1).await.unwrap().content, "one");
        assert!(store.get_message_by_id(3).await.is_none());
    }

    #[tokio::test]
    async fn test_cap_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 3).await;
        for i in 0..4 {
            store.add_message(&format!("m{}", i), None).await.unwrap();
        }
        let feed = store.get_messages(10).await;
        let contents: Vec<_> = feed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m2", "m1"]);
        assert_eq!(store.stats().await.next_message_id, 5);
    }

    #[tokio::test]
    async fn test_recipient_lookup_and_inbox() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 100).await;
        let alice = store.create_user("alice", "h1", "r-alice").await.unwrap();
        let bob = store.create_user("bob", "h2", "r-bob").await.unwrap();
        store.add_message("public", None).await.unwrap();
        store.add_message_to_recipient("r-alice", "hi alice").await.unwrap();
        store.add_message_to_recipient("r-bob", "hi bob").await.unwrap();

        let inbox = store.get_messages_for_user(alice.id, 10).await;
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].content, "hi alice");
        assert_eq!(inbox[0].owner_user_id, Some(alice.id));
        assert_eq!(store.get_messages_for_user(bob.id, 10).await.len(), 1);
        // The unfiltered feed includes direct messages too.
        assert_eq!(store.get_messages(10).await.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_recipient_declined() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 100).await;
        let err = store
            .add_message_to_recipient("nonexistent-token", "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RecipientNotFound(_)));
        assert_eq!(store.stats().await.messages, 0);
        assert_eq!(store.stats().await.next_message_id, 1);
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_duplicate_username_and_recipient() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 100).await;
        store.create_user("alice", "h1", "r1").await.unwrap();
        let dup = store.create_user("alice", "h2", "r2").await.unwrap_err();
        assert!(dup.is_conflict());
        assert!(matches!(dup, StoreError::UsernameTaken(_)));
        let dup_link = store.create_user("carol", "h3", "r1").await.unwrap_err();
        assert!(matches!(dup_link, StoreError::RecipientTaken(_)));
        // Case-sensitive usernames.
        store.create_user("Alice", "h4", "r4").await.unwrap();
        let stats = store.stats().await;
        assert_eq!(stats.users, 2);
        assert_eq!(stats.next_user_id, 3);
    }

    #[tokio::test]
    async fn test_user_lookups() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 100).await;
        let u = store.create_user("dana", "hash", "feedbeef0001").await.unwrap();
        assert_eq!(store.get_user_by_username("dana").await, Some(u.clone()));
        assert_eq!(store.get_user_by_id(u.id).await, Some(u.clone()));
        assert_eq!(store.get_user_by_recipient_id("feedbeef0001").await, Some(u));
        assert!(store.get_user_by_username("DANA").await.is_none());
        assert!(store.get_user_by_id(99).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("store.json"), "{\"nextMsgId\": oops").unwrap();
        let store = store_in(&dir, 100).await;
        assert_eq!(store.stats().await.messages, 0);
        assert_eq!(store.add_message("after", None).await.unwrap(), 1);
        let corrupt = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(corrupt);
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_and_not_applied() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir, 100).await;
        store.add_message("kept", None).await.unwrap();

        // Make the snapshot path a directory so the rename fails.
        std::fs::remove_file(store.path()).unwrap();
        std::fs::create_dir(store.path()).unwrap();
        std::fs::write(store.path().join("blocker"), "x").unwrap();

        let err = store.add_message("lost", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Persist { .. }));
        let feed = store.get_messages(10).await;
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0].content, "kept");
        assert_eq!(store.stats().await.next_message_id, 2);
    }
}
