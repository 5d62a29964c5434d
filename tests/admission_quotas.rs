//! Quota behaviour of the admission controller, driven with explicit clocks.

use chrono::{DateTime, Duration, TimeZone, Utc};
use postbox::admission::{AdmissionController, Decision, DenyReason};
use postbox::config::AdmissionConfig;

fn day_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 4, 0, 0, 0).unwrap()
}

#[test]
fn three_calls_inside_cooldown() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let t0 = day_start() + Duration::hours(9);

    assert!(controller.check_and_record("198.51.100.1", t0).is_allowed());
    let second = controller.check_and_record("198.51.100.1", t0 + Duration::seconds(12));
    let third = controller.check_and_record("198.51.100.1", t0 + Duration::seconds(25));

    assert_eq!(second.deny_reason(), Some(DenyReason::Cooldown));
    assert_eq!(second.retry_after(), Some(18));
    assert_eq!(third.deny_reason(), Some(DenyReason::Cooldown));
    assert_eq!(third.retry_after(), Some(5));
}

#[test]
fn sixth_post_in_window_denied_after_cooldown() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let t0 = day_start() + Duration::hours(14);

    let mut remaining = Vec::new();
    for i in 0..5 {
        match controller.check_and_record("client", t0 + Duration::seconds(40 * i)) {
            Decision::Allow(q) => {
                assert_eq!(q.limit, 5);
                remaining.push(q.remaining);
            }
            other => panic!("post {} denied: {:?}", i, other),
        }
    }
    assert_eq!(remaining, vec![4, 3, 2, 1, 0]);

    let sixth = controller.check_and_record("client", t0 + Duration::seconds(200));
    assert_eq!(
        sixth,
        Decision::Deny {
            reason: DenyReason::WindowExceeded,
            retry_after: Some(400),
        }
    );
}

#[test]
fn daily_cap_then_rollover() {
    let controller = AdmissionController::new(AdmissionConfig::default());
    let t0 = day_start();

    // Two minutes apart keeps both the cooldown and the rolling window satisfied.
    for i in 0..200 {
        let d = controller.check_and_record("busy", t0 + Duration::minutes(2 * i));
        assert!(d.is_allowed(), "event {} denied: {:?}", i, d);
    }
    assert_eq!(controller.client_state("busy").unwrap().day_count, 200);

    let over = controller.check_and_record("busy", t0 + Duration::minutes(400));
    assert_eq!(over.deny_reason(), Some(DenyReason::DailyExceeded));
    assert_eq!(over.retry_after(), Some(24 * 3600 - 400 * 60));

    let tomorrow = t0 + Duration::days(1);
    assert!(controller.check_and_record("busy", tomorrow).is_allowed());
    let state = controller.client_state("busy").unwrap();
    assert_eq!(state.day_key, tomorrow.date_naive());
    assert_eq!(state.day_count, 1);
}

#[test]
fn overridden_limits_are_honoured() {
    let controller = AdmissionController::new(AdmissionConfig {
        cooldown_seconds: 0,
        window_seconds: 60,
        window_max: 2,
        daily_max: 3,
        sweep_interval_seconds: 0,
    });
    let t0 = day_start() + Duration::hours(1);

    assert!(controller.check_and_record("x", t0).is_allowed());
    assert!(controller.check_and_record("x", t0).is_allowed());
    assert_eq!(
        controller.check_and_record("x", t0).deny_reason(),
        Some(DenyReason::WindowExceeded)
    );
    assert!(controller
        .check_and_record("x", t0 + Duration::seconds(61))
        .is_allowed());
    assert_eq!(
        controller
            .check_and_record("x", t0 + Duration::seconds(200))
            .deny_reason(),
        Some(DenyReason::DailyExceeded)
    );
}
