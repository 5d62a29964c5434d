//! Process-wide counters for the write path.
//! Read through [`snapshot`] for status output; nothing exports them yet.
use std::sync::atomic::{AtomicU64, Ordering};

static ADMISSION_ALLOWED: AtomicU64 = AtomicU64::new(0);
static DENIED_COOLDOWN: AtomicU64 = AtomicU64::new(0);
static DENIED_WINDOW: AtomicU64 = AtomicU64::new(0);
static DENIED_DAILY: AtomicU64 = AtomicU64::new(0);
static CLIENTS_SWEPT: AtomicU64 = AtomicU64::new(0);
static MESSAGES_STORED: AtomicU64 = AtomicU64::new(0);
static USERS_CREATED: AtomicU64 = AtomicU64::new(0);
static PERSIST_FAILURES: AtomicU64 = AtomicU64::new(0);
static LOAD_FALLBACKS: AtomicU64 = AtomicU64::new(0);

pub fn inc_admission_allowed() {
    ADMISSION_ALLOWED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_denied_cooldown() {
    DENIED_COOLDOWN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_denied_window() {
    DENIED_WINDOW.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_denied_daily() {
    DENIED_DAILY.fetch_add(1, Ordering::Relaxed);
}
pub fn add_clients_swept(n: u64) {
    CLIENTS_SWEPT.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_messages_stored() {
    MESSAGES_STORED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_users_created() {
    USERS_CREATED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_persist_failures() {
    PERSIST_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_load_fallbacks() {
    LOAD_FALLBACKS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub admission_allowed: u64,
    pub denied_cooldown: u64,
    pub denied_window: u64,
    pub denied_daily: u64,
    pub clients_swept: u64,
    pub messages_stored: u64,
    pub users_created: u64,
    pub persist_failures: u64,
    pub load_fallbacks: u64,
}

impl Snapshot {
    pub fn denied_total(&self) -> u64 {
        self.denied_cooldown + self.denied_window + self.denied_daily
    }
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        admission_allowed: ADMISSION_ALLOWED.load(Ordering::Relaxed),
        denied_cooldown: DENIED_COOLDOWN.load(Ordering::Relaxed),
        denied_window: DENIED_WINDOW.load(Ordering::Relaxed),
        denied_daily: DENIED_DAILY.load(Ordering::Relaxed),
        clients_swept: CLIENTS_SWEPT.load(Ordering::Relaxed),
        messages_stored: MESSAGES_STORED.load(Ordering::Relaxed),
        users_created: USERS_CREATED.load(Ordering::Relaxed),
        persist_failures: PERSIST_FAILURES.load(Ordering::Relaxed),
        load_fallbacks: LOAD_FALLBACKS.load(Ordering::Relaxed),
    }
}
