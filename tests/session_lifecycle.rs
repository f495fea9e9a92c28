// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for guarded screens: identity resolution, envelopes,
//! privileges, persistence across reloads and the async driver.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use farmgate::envelope::{EnvelopeCodec, SigningKey};
use farmgate::identity::{
    resolve_wire, Identity, IdentityWire, LoginStatus, Role, StaticIdentitySource,
    SUPER_USER_SENTINEL,
};
use farmgate::security::{
    screen_channels, ActivityKind, ActivityStore, Clock, FileActivityStore, GuardState,
    InvalidationReason, ManualClock, ManualTicker, MemoryActivityStore, RecordingNavigator,
    SessionConfig, SessionGuard, StorageKeys, Ticker, TokioTicker,
};
use serde_json::json;
use tempfile::tempdir;

const SECRET: &str = "integration-secret-0123456789abcd";

fn start_clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap())
}

fn codec() -> EnvelopeCodec {
    EnvelopeCodec::new(SigningKey::new("k1", SECRET).unwrap())
}

fn district_officer() -> Identity {
    Identity::new(
        "u-102",
        "EMP-4471",
        Role::new("r-7", "District Officer", ["Crops:Read", "Crops:Update", "Harvests:Read"]),
    )
}

fn mount<S: ActivityStore>(
    store: S,
    clock: &ManualClock,
) -> SessionGuard<S, RecordingNavigator, ManualTicker, ManualClock> {
    SessionGuard::new(
        SessionConfig::default(),
        store,
        RecordingNavigator::new(),
        ManualTicker::new(),
        clock.clone(),
    )
}

fn tick_for<S: ActivityStore>(
    guard: &mut SessionGuard<S, RecordingNavigator, ManualTicker, ManualClock>,
    clock: &ManualClock,
    seconds: u64,
) {
    for _ in 0..seconds {
        clock.advance(ChronoDuration::seconds(1));
        guard.tick();
    }
}

#[test]
fn test_wrapped_identity_drives_privileges() {
    let envelope = codec().seal(&district_officer()).unwrap();
    let body: Option<IdentityWire> =
        serde_json::from_value(json!({ "envelope": envelope })).unwrap();
    let identity = resolve_wire(body, Some(&codec())).unwrap();

    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(identity));

    assert_eq!(guard.state(), GuardState::Active);
    assert!(!guard.lacks_privilege(&["Crops:Update"]));
    assert!(!guard.lacks_privilege(&["Crops:Delete", "Harvests:Read"]));
    assert!(guard.lacks_privilege(&["Crops:Delete"]));
    assert!(guard.lacks_privilege::<&str>(&[]));
}

#[test]
fn test_super_user_role_passes_every_gate() {
    let admin = Identity::new(
        "u-1",
        "EMP-1",
        Role::new(format!("r-{}", SUPER_USER_SENTINEL), "Administrator", Vec::<String>::new()),
    );

    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(Some(admin)));

    assert!(!guard.lacks_privilege(&["Farmers:Delete"]));
}

#[test]
fn test_tampered_identity_envelope_invalidates() {
    let envelope = codec().seal(&district_officer()).unwrap();
    let mut tampered = envelope.into_bytes();
    let middle = tampered.len() / 2;
    tampered[middle] = if tampered[middle] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();

    let body: Option<IdentityWire> =
        serde_json::from_value(json!({ "envelope": tampered })).unwrap();

    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(resolve_wire(body, Some(&codec())));

    assert_eq!(guard.state(), GuardState::Invalid);
    assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::FetchFailed));
    assert_eq!(guard.navigator().redirects.len(), 1);
}

#[test]
fn test_remote_logout_ends_session_on_stale_route() {
    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(Some(district_officer().with_login_status(LoginStatus::Logout))));

    assert_eq!(guard.state(), GuardState::Invalid);
    assert_eq!(guard.navigator().last_redirect(), Some("/logout?reason=stale"));
}

#[test]
fn test_idle_for_full_window_logs_out_once() {
    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(Some(district_officer())));

    tick_for(&mut guard, &clock, 900);

    assert_eq!(guard.state(), GuardState::Invalid);
    assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IdleTimeout));
    assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
    assert_eq!(guard.navigator().clears_before_redirect, vec![1]);
    assert!(!guard.ticker().is_running());
    assert!(guard.identity().is_none());
}

#[test]
fn test_click_at_second_ten_keeps_session_alive_at_905() {
    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(Some(district_officer())));

    tick_for(&mut guard, &clock, 10);
    guard.record_activity(ActivityKind::Click);
    tick_for(&mut guard, &clock, 895);

    assert_eq!(guard.state(), GuardState::Active);
    assert_eq!(guard.remaining_secs(), 5);
    assert!(guard.navigator().redirects.is_empty());
}

#[test]
fn test_laptop_asleep_for_an_hour_logs_out_on_wake() {
    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(Some(district_officer())));
    tick_for(&mut guard, &clock, 2);

    // No ticks are delivered while the process is suspended.
    clock.advance(ChronoDuration::hours(1));
    guard.tick();

    assert_eq!(guard.state(), GuardState::Invalid);
    assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IdleTimeout));
    assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
    assert!(guard.lacks_privilege(&["Crops:Read"]));
}

#[test]
fn test_reload_after_twenty_idle_minutes_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("activity.json");
    let clock = start_clock();

    let mut first = mount(FileActivityStore::new(&path, StorageKeys::default()), &clock);
    first.resolve(Ok(Some(district_officer())));
    tick_for(&mut first, &clock, 30);
    first.record_activity(ActivityKind::KeyPress);
    first.unmount();
    drop(first);

    clock.advance(ChronoDuration::minutes(20));

    let mut reloaded = mount(FileActivityStore::new(&path, StorageKeys::default()), &clock);
    reloaded.resolve(Ok(Some(district_officer())));

    assert_eq!(reloaded.state(), GuardState::Invalid);
    assert_eq!(reloaded.invalidation_reason(), Some(InvalidationReason::ExpiredBeforeLoad));
    assert_eq!(reloaded.ticker().starts(), 0);
    assert_eq!(reloaded.navigator().redirects, vec!["/logout".to_string()]);
    assert_eq!(reloaded.store().last_activity().unwrap(), None);
}

#[test]
fn test_reload_inside_window_restarts_countdown() {
    let store = MemoryActivityStore::default();
    let clock = start_clock();

    let mut first = mount(store.clone(), &clock);
    first.resolve(Ok(Some(district_officer())));
    first.unmount();

    clock.advance(ChronoDuration::minutes(10));

    let mut reloaded = mount(store, &clock);
    reloaded.resolve(Ok(Some(district_officer())));

    assert_eq!(reloaded.state(), GuardState::Active);
    assert_eq!(reloaded.remaining_secs(), 900);
    assert_eq!(reloaded.store().last_activity().unwrap(), Some(clock.now()));
}

#[test]
fn test_failed_data_load_does_not_stop_countdown() {
    let clock = start_clock();
    let mut guard = mount(MemoryActivityStore::default(), &clock);
    guard.resolve(Ok(Some(district_officer())));
    tick_for(&mut guard, &clock, 3);

    // A screen's result-set envelope fails to verify; the session carries on.
    let result_set = codec().encode(&json!({ "rows": [1, 2, 3] }));
    let corrupted = format!("{}x", result_set);
    assert!(codec().decode(&corrupted).is_err());

    assert_eq!(guard.state(), GuardState::Active);
    assert!(guard.ticker().is_running());
    tick_for(&mut guard, &clock, 1);
    assert_eq!(guard.remaining_secs(), 896);
}

#[tokio::test(start_paused = true)]
async fn test_driver_keeps_active_user_signed_in() {
    let (handle, tick_tx, driver) = screen_channels();
    let clock = start_clock();
    let guard = SessionGuard::new(
        SessionConfig::custom(5, 970),
        MemoryActivityStore::default(),
        RecordingNavigator::new(),
        TokioTicker::new(tick_tx),
        clock,
    );
    let source = StaticIdentitySource::found(district_officer());

    let task = tokio::spawn(async move { driver.run(guard, &source).await });

    // Activity every ~3s keeps a 5s window alive well past 5s.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(3 * 970)).await;
        assert!(handle.activity(ActivityKind::PointerMove));
    }
    handle.logout();

    let guard = task.await.unwrap();
    assert_eq!(guard.state(), GuardState::Terminated);
    assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
}
