//! # Admission Control
//!
//! Gates write traffic per client identifier (typically the remote address the
//! transport resolved) with three layered quotas:
//!
//! - **Cooldown**: minimum spacing between accepted events
//! - **Rolling window**: at most `window_max` accepted events per trailing window
//! - **Daily cap**: at most `daily_max` accepted events per UTC calendar day
//!
//! The state is volatile. A restart forgets every client, which is acceptable
//! for a best-effort abuse guard.
//!
//! ```rust
//! use chrono::Utc;
//! use postbox::admission::{AdmissionController, Decision};
//! use postbox::config::AdmissionConfig;
//!
//! let controller = AdmissionController::new(AdmissionConfig::default());
//! match controller.check_and_record("203.0.113.7", Utc::now()) {
//!     Decision::Allow(quota) => assert_eq!(quota.limit, 5),
//!     Decision::Deny { reason, .. } => panic!("first request denied: {reason}"),
//! }
//! ```

mod gate;

pub use gate::{
    ceil_seconds, evaluate, seconds_until_utc_midnight, ClientQuotaState, Decision, DenyReason,
    Quota,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::config::AdmissionConfig;
use crate::metrics;

/// Shared admission state for every client on the write path.
///
/// One coarse lock covers the whole map, so two concurrent checks for the same
/// client can never both pass the same gate.
pub struct AdmissionController {
    config: AdmissionConfig,
    clients: Mutex<HashMap<String, ClientQuotaState>>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientQuotaState>> {
        self.clients.lock().expect("admission state mutex poisoned")
    }

    /// Decide whether `client_id` may write at `now`, recording the event if so.
    pub fn check_and_record(&self, client_id: &str, now: DateTime<Utc>) -> Decision {
        let decision = {
            let mut clients = self.lock();
            let state = clients
                .entry(client_id.to_string())
                .or_insert_with(|| ClientQuotaState::new(now));
            let (next, decision) = evaluate(state, now, &self.config);
            *state = next;
            decision
        };

        match decision {
            Decision::Allow(quota) => {
                metrics::inc_admission_allowed();
                debug!(
                    "admission allowed client={} remaining={}/{} reset={}s",
                    client_id, quota.remaining, quota.limit, quota.reset
                );
            }
            Decision::Deny {
                reason,
                retry_after,
            } => {
                match reason {
                    DenyReason::Cooldown => metrics::inc_denied_cooldown(),
                    DenyReason::WindowExceeded => metrics::inc_denied_window(),
                    DenyReason::DailyExceeded => metrics::inc_denied_daily(),
                }
                warn!(
                    target: "security",
                    "admission denied client={} reason={} retry_after={:?}",
                    client_id, reason, retry_after
                );
            }
        }
        decision
    }

    /// Current bookkeeping for a client, if it has been seen.
    pub fn client_state(&self, client_id: &str) -> Option<ClientQuotaState> {
        self.lock().get(client_id).cloned()
    }

    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Drop state for clients that can no longer be denied by it. Returns the
    /// number of entries removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, state| !state.is_idle(now, &self.config));
        let removed = before - clients.len();
        if removed > 0 {
            metrics::add_clients_swept(removed as u64);
            debug!("admission sweep removed {} idle clients, {} remain", removed, clients.len());
        }
        removed
    }
}

/// Run [`AdmissionController::sweep`] every `every` on the tokio runtime.
pub fn spawn_sweeper(
    controller: Arc<AdmissionController>,
    every: StdDuration,
) -> tokio::task::JoinHandle<()> {
    info!("admission sweeper running every {}s", every.as_secs());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            controller.sweep(Utc::now());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::thread;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_three_rapid_calls() {
        let controller = AdmissionController::new(AdmissionConfig::default());
        let t0 = noon();
        assert!(controller.check_and_record("10.0.0.1", t0).is_allowed());
        for offset in [5, 29] {
            let d = controller.check_and_record("10.0.0.1", t0 + Duration::seconds(offset));
            assert_eq!(d.deny_reason(), Some(DenyReason::Cooldown));
        }
    }

    #[test]
    fn test_clients_are_independent() {
        let controller = AdmissionController::new(AdmissionConfig::default());
        let t0 = noon();
        assert!(controller.check_and_record("a", t0).is_allowed());
        assert!(controller.check_and_record("b", t0).is_allowed());
        assert_eq!(controller.tracked_clients(), 2);
        assert_eq!(controller.client_state("a").unwrap().day_count, 1);
        assert!(controller.client_state("c").is_none());
    }

    #[test]
    fn test_concurrent_same_client_single_allow() {
        let controller = Arc::new(AdmissionController::new(AdmissionConfig::default()));
        let now = noon();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let c = Arc::clone(&controller);
                thread::spawn(move || c.check_and_record("shared", now).is_allowed())
            })
            .collect();
        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(allowed, 1);
        assert_eq!(controller.client_state("shared").unwrap().day_count, 1);
    }

    #[test]
    fn test_sweep_keeps_active_and_drops_idle() {
        let controller = AdmissionController::new(AdmissionConfig::default());
        let t0 = noon();
        controller.check_and_record("old", t0);
        controller.check_and_record("fresh", t0 + Duration::hours(13));

        // Next UTC day: "old" has been quiet for 13h and its counter is stale.
        let later = t0 + Duration::hours(13) + Duration::minutes(1);
        assert_eq!(controller.sweep(later), 1);
        assert!(controller.client_state("old").is_none());
        assert!(controller.client_state("fresh").is_some());
    }

    #[tokio::test]
    async fn test_sweeper_task_runs() {
        let controller = Arc::new(AdmissionController::new(AdmissionConfig::default()));
        let long_ago = Utc::now() - Duration::days(2);
        controller.check_and_record("stale", long_ago);
        assert_eq!(controller.tracked_clients(), 1);

        let handle = spawn_sweeper(Arc::clone(&controller), StdDuration::from_millis(20));
        tokio::time::sleep(StdDuration::from_millis(120)).await;
        handle.abort();
        assert_eq!(controller.tracked_clients(), 0);
    }
}
