//! The quota state machine: `(state, now, config) -> (state, decision)`.
//!
//! Gates run in a fixed order and the first violated one wins:
//! cooldown, then rolling window, then daily cap.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::config::AdmissionConfig;

/// Per-client bookkeeping, created lazily on the first check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientQuotaState {
    /// Accepted events inside the rolling window, oldest first
    pub recent_events: VecDeque<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
    /// UTC date `day_count` belongs to
    pub day_key: NaiveDate,
    pub day_count: u32,
}

impl ClientQuotaState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            recent_events: VecDeque::new(),
            last_event: None,
            day_key: now.date_naive(),
            day_count: 0,
        }
    }

    /// True when nothing in this state can deny a request at `now`.
    pub fn is_idle(&self, now: DateTime<Utc>, config: &AdmissionConfig) -> bool {
        let quiet = match self.last_event {
            Some(last) => now - last >= config.idle_horizon(),
            None => true,
        };
        quiet && (self.day_key != now.date_naive() || self.day_count == 0)
    }
}

/// Why a check was denied. `as_str` gives the wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    Cooldown,
    WindowExceeded,
    DailyExceeded,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Cooldown => "cooldown",
            DenyReason::WindowExceeded => "window_exceeded",
            DenyReason::DailyExceeded => "daily_exceeded",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry returned with an accepted event, in whole seconds where timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Events allowed per rolling window
    pub limit: usize,
    /// Events still available in the current window
    pub remaining: usize,
    /// Seconds until the oldest event in the window expires
    pub reset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow(Quota),
    Deny {
        reason: DenyReason,
        /// Whole seconds the client should wait. Daily denials report the time
        /// left until the next UTC midnight.
        retry_after: Option<u64>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    pub fn deny_reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow(_) => None,
            Decision::Deny { reason, .. } => Some(*reason),
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Decision::Allow(_) => None,
            Decision::Deny { retry_after, .. } => *retry_after,
        }
    }
}

/// Round a duration up to whole seconds; non-positive durations give 0.
pub fn ceil_seconds(d: Duration) -> u64 {
    let micros = d
        .num_microseconds()
        .unwrap_or_else(|| d.num_milliseconds().saturating_mul(1000));
    if micros <= 0 {
        0
    } else {
        ((micros + 999_999) / 1_000_000) as u64
    }
}

/// Whole seconds from `now` until the next UTC midnight.
pub fn seconds_until_utc_midnight(now: DateTime<Utc>) -> u64 {
    match now.date_naive().succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Some(midnight) => ceil_seconds(midnight.and_utc() - now),
        None => 0,
    }
}

/// Evaluate one event for a client.
///
/// The returned state differs from the input only by the day rotation when the
/// decision is a denial.
pub fn evaluate(
    state: &ClientQuotaState,
    now: DateTime<Utc>,
    config: &AdmissionConfig,
) -> (ClientQuotaState, Decision) {
    let mut next = state.clone();

    let today = now.date_naive();
    if next.day_key != today {
        next.day_key = today;
        next.day_count = 0;
    }

    if let Some(last) = next.last_event {
        let since = now - last;
        if since < config.cooldown() {
            let retry = ceil_seconds(config.cooldown() - since);
            return (
                next,
                Decision::Deny {
                    reason: DenyReason::Cooldown,
                    retry_after: Some(retry),
                },
            );
        }
    }

    let mut recent = next.recent_events.clone();
    let horizon = now - config.window();
    while recent.front().is_some_and(|t| *t <= horizon) {
        recent.pop_front();
    }

    if recent.len() >= config.window_max {
        let retry = recent
            .front()
            .map(|oldest| ceil_seconds(*oldest + config.window() - now))
            .unwrap_or(0);
        return (
            next,
            Decision::Deny {
                reason: DenyReason::WindowExceeded,
                retry_after: Some(retry),
            },
        );
    }

    if next.day_count >= config.daily_max {
        return (
            next,
            Decision::Deny {
                reason: DenyReason::DailyExceeded,
                retry_after: Some(seconds_until_utc_midnight(now)),
            },
        );
    }

    recent.push_back(now);
    next.recent_events = recent;
    next.last_event = Some(now);
    next.day_count += 1;

    let reset = next
        .recent_events
        .front()
        .map(|oldest| ceil_seconds(*oldest + config.window() - now))
        .unwrap_or(0);
    let quota = Quota {
        limit: config.window_max,
        remaining: config.window_max.saturating_sub(next.recent_events.len()),
        reset,
    };
    (next, Decision::Allow(quota))
}
