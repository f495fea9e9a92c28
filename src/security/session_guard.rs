// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session Lifecycle Guard
//!
//! Keeps a protected screen's session alive only while the user is active.
//!
//! ## States
//!
//! ```text
//! Resolving --identity ok--> Active --countdown hits 0--> Expiring --> Invalid
//!     |                        |
//!     +--bad identity------> Invalid <--expired before load--+
//!
//! any live state --logout--> Terminated
//! ```
//!
//! `Invalid` and `Terminated` are absorbing: once reached, every further
//! event is ignored and no second redirect is ever issued.
//!
//! ## Persistence
//!
//! Only the last-activity timestamp survives a reload. The countdown is
//! recomputed from the full idle window on every entry to `Active`, after
//! checking that the persisted timestamp is still inside the window. A user
//! who reloads mid-idle is therefore still logged out on schedule.
//!
//! ## Ordering
//!
//! Events are applied one at a time, each to completion. The guard itself
//! has no notion of "same tick"; the driver decides the order and always
//! applies pending activity before a pending tick.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};
use super::navigator::{Navigator, RedirectRoutes};
use super::privilege;
use super::store::ActivityStore;
use super::ticker::Ticker;
use crate::identity::{Identity, IdentityError};

/// Idle window observed in production: 15 minutes.
pub const DEFAULT_IDLE_WINDOW_SECS: u64 = 900;

/// Countdown cadence, kept just under a second to absorb scheduling jitter.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 970;

/// How long before expiry the warning period starts.
pub const DEFAULT_WARNING_BEFORE_TIMEOUT_SECS: u64 = 120;

/// Longest idle window accepted by [`SessionConfig::custom`].
pub const MAX_IDLE_WINDOW_SECS: u64 = 86_400;

/// Pointer-move storms persist the timestamp at most this often.
const PERSIST_GRANULARITY_MS: i64 = 1_000;

/// While counting down, the per-identity remaining-seconds mirror is only
/// rewritten on multiples of this.
const MIRROR_EVERY_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_window_secs")]
    pub idle_window_secs: u64,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_warning_before_timeout_secs")]
    pub warning_before_timeout_secs: u64,

    #[serde(default)]
    pub routes: RedirectRoutes,
}

fn default_idle_window_secs() -> u64 {
    DEFAULT_IDLE_WINDOW_SECS
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_warning_before_timeout_secs() -> u64 {
    DEFAULT_WARNING_BEFORE_TIMEOUT_SECS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_window_secs: DEFAULT_IDLE_WINDOW_SECS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            warning_before_timeout_secs: DEFAULT_WARNING_BEFORE_TIMEOUT_SECS,
            routes: RedirectRoutes::default(),
        }
    }
}

impl SessionConfig {
    /// Build a configuration with validated values.
    pub fn custom(idle_window_secs: u64, tick_interval_ms: u64) -> Self {
        Self {
            idle_window_secs,
            tick_interval_ms,
            ..Self::default()
        }
        .validated()
    }

    /// Clamp out-of-range values, warning about each one.
    ///
    /// - idle window: 1 ..= [`MAX_IDLE_WINDOW_SECS`]
    /// - tick interval: 1 ..= 999 ms (must stay under one second)
    /// - warning period: below the idle window
    pub fn validated(mut self) -> Self {
        let idle = self.idle_window_secs.clamp(1, MAX_IDLE_WINDOW_SECS);
        if idle != self.idle_window_secs {
            tracing::warn!(
                "SESSION_CONFIG | idle_window_secs={} out of range, using {}",
                self.idle_window_secs,
                idle
            );
            self.idle_window_secs = idle;
        }

        let tick = self.tick_interval_ms.clamp(1, 999);
        if tick != self.tick_interval_ms {
            tracing::warn!(
                "SESSION_CONFIG | tick_interval_ms={} must be under one second, using {}",
                self.tick_interval_ms,
                tick
            );
            self.tick_interval_ms = tick;
        }

        self.warning_before_timeout_secs = self
            .warning_before_timeout_secs
            .min(self.idle_window_secs.saturating_sub(1));

        self
    }

    pub fn idle_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_window_secs as i64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardState {
    /// Identity fetch in flight.
    Resolving,
    /// Countdown running.
    Active,
    /// Countdown reached zero; passes straight through to `Invalid`.
    Expiring,
    /// Session ended by an error condition or timeout.
    Invalid,
    /// Session ended by the user.
    Terminated,
}

impl GuardState {
    /// `Invalid` or `Terminated`.
    pub fn is_finished(&self) -> bool {
        matches!(self, GuardState::Invalid | GuardState::Terminated)
    }
}

impl fmt::Display for GuardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardState::Resolving => write!(f, "RESOLVING"),
            GuardState::Active => write!(f, "ACTIVE"),
            GuardState::Expiring => write!(f, "EXPIRING"),
            GuardState::Invalid => write!(f, "INVALID"),
            GuardState::Terminated => write!(f, "TERMINATED"),
        }
    }
}

/// Why a session was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// The identity query failed.
    FetchFailed,
    /// The identity query answered "nobody".
    IdentityAbsent,
    /// Identity lacks an id or employee reference.
    IncompleteIdentity,
    /// Server flagged the login as `LOGOUT`, or sent no status.
    LoggedOutRemotely,
    /// Persisted activity was already outside the idle window on load.
    ExpiredBeforeLoad,
    /// Countdown reached zero.
    IdleTimeout,
    /// Persisted activity could not be read.
    StoreUnavailable,
}

impl InvalidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationReason::FetchFailed => "fetch_failed",
            InvalidationReason::IdentityAbsent => "identity_absent",
            InvalidationReason::IncompleteIdentity => "incomplete_identity",
            InvalidationReason::LoggedOutRemotely => "logged_out_remotely",
            InvalidationReason::ExpiredBeforeLoad => "expired_before_load",
            InvalidationReason::IdleTimeout => "idle_timeout",
            InvalidationReason::StoreUnavailable => "store_unavailable",
        }
    }

    /// Stale or foreign identities go to the stale-identity route.
    pub fn is_stale_identity(&self) -> bool {
        matches!(
            self,
            InvalidationReason::IncompleteIdentity | InvalidationReason::LoggedOutRemotely
        )
    }
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualifying user-activity events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Click,
    PointerMove,
    KeyPress,
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityKind::Click => write!(f, "click"),
            ActivityKind::PointerMove => write!(f, "pointer_move"),
            ActivityKind::KeyPress => write!(f, "key_press"),
        }
    }
}

/// Session events for audit logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GuardEvent {
    Activated {
        identity_id: String,
        employee_ref: String,
        timestamp: DateTime<Utc>,
        remaining_secs: u64,
    },
    Refreshed {
        identity_id: String,
        activity: ActivityKind,
        timestamp: DateTime<Utc>,
    },
    WarningIssued {
        identity_id: String,
        timestamp: DateTime<Utc>,
        expires_in_secs: u64,
    },
    Expiring {
        identity_id: String,
        timestamp: DateTime<Utc>,
    },
    Invalidated {
        identity_id: Option<String>,
        timestamp: DateTime<Utc>,
        reason: InvalidationReason,
        route: String,
    },
    Terminated {
        identity_id: Option<String>,
        timestamp: DateTime<Utc>,
        route: String,
    },
}

impl GuardEvent {
    /// Format event for the audit log.
    pub fn to_audit_string(&self) -> String {
        let stamp = |t: &DateTime<Utc>| t.format("%Y-%m-%d %H:%M:%S UTC").to_string();
        let who = |id: &Option<String>| id.clone().unwrap_or_else(|| "-".to_string());
        match self {
            GuardEvent::Activated {
                identity_id,
                employee_ref,
                timestamp,
                remaining_secs,
            } => format!(
                "{} | SESSION_ACTIVE | identity={} employee={} remaining={}s",
                stamp(timestamp),
                identity_id,
                employee_ref,
                remaining_secs
            ),
            GuardEvent::Refreshed {
                identity_id,
                activity,
                timestamp,
            } => format!(
                "{} | SESSION_REFRESHED | identity={} activity={}",
                stamp(timestamp),
                identity_id,
                activity
            ),
            GuardEvent::WarningIssued {
                identity_id,
                timestamp,
                expires_in_secs,
            } => format!(
                "{} | SESSION_WARNING | identity={} expires_in={}s",
                stamp(timestamp),
                identity_id,
                expires_in_secs
            ),
            GuardEvent::Expiring {
                identity_id,
                timestamp,
            } => format!(
                "{} | SESSION_EXPIRING | identity={}",
                stamp(timestamp),
                identity_id
            ),
            GuardEvent::Invalidated {
                identity_id,
                timestamp,
                reason,
                route,
            } => format!(
                "{} | SESSION_INVALID | identity={} reason={} route={}",
                stamp(timestamp),
                who(identity_id),
                reason,
                route
            ),
            GuardEvent::Terminated {
                identity_id,
                timestamp,
                route,
            } => format!(
                "{} | SESSION_TERMINATED | identity={} route={}",
                stamp(timestamp),
                who(identity_id),
                route
            ),
        }
    }
}

/// Session state machine for one protected screen.
///
/// All side effects go through injected collaborators, so the whole
/// lifecycle can be exercised without a real timer or wall clock.
pub struct SessionGuard<S, N, T, C = SystemClock> {
    config: SessionConfig,
    store: S,
    navigator: N,
    ticker: T,
    clock: C,
    state: GuardState,
    identity: Option<Identity>,
    remaining_secs: u64,
    last_activity: Option<DateTime<Utc>>,
    last_persisted: Option<DateTime<Utc>>,
    warning_issued: bool,
    invalidation: Option<InvalidationReason>,
}

impl<S, N, T, C> SessionGuard<S, N, T, C>
where
    S: ActivityStore,
    N: Navigator,
    T: Ticker,
    C: Clock,
{
    /// Mount the guard. It starts in `Resolving` and waits for
    /// [`resolve`](Self::resolve).
    pub fn new(config: SessionConfig, store: S, navigator: N, ticker: T, clock: C) -> Self {
        Self {
            config: config.validated(),
            store,
            navigator,
            ticker,
            clock,
            state: GuardState::Resolving,
            identity: None,
            remaining_secs: 0,
            last_activity: None,
            last_persisted: None,
            warning_issued: false,
            invalidation: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    /// The identity, while the session is `Active`.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn remaining_secs(&self) -> u64 {
        self.remaining_secs
    }

    pub fn invalidation_reason(&self) -> Option<InvalidationReason> {
        self.invalidation
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    pub fn ticker(&self) -> &T {
        &self.ticker
    }

    /// Privilege gate bound to the current session. Everything is denied
    /// unless the session is `Active`.
    pub fn lacks_privilege<P: AsRef<str>>(&self, required: &[P]) -> bool {
        privilege::lacks_privilege(self.identity(), required)
    }

    /// Apply the outcome of the identity fetch. Only the first outcome
    /// counts; later ones are ignored.
    pub fn resolve(&mut self, outcome: Result<Option<Identity>, IdentityError>) {
        if self.state != GuardState::Resolving {
            tracing::warn!(
                "SESSION_RESOLVE_IGNORED | state={} reason=already_resolved",
                self.state
            );
            return;
        }

        let identity = match outcome {
            Err(e) => {
                tracing::warn!("IDENTITY_UNRESOLVED | error={}", e);
                self.invalidate(InvalidationReason::FetchFailed);
                return;
            }
            Ok(None) => {
                self.invalidate(InvalidationReason::IdentityAbsent);
                return;
            }
            Ok(Some(identity)) => identity,
        };

        if !identity.is_complete() {
            self.invalidate(InvalidationReason::IncompleteIdentity);
            return;
        }
        if !identity.is_logged_in() {
            self.identity = Some(identity);
            self.invalidate(InvalidationReason::LoggedOutRemotely);
            return;
        }

        self.identity = Some(identity);
        self.activate();
    }

    fn activate(&mut self) {
        let now = self.clock.now();

        match self.store.last_activity() {
            Err(e) => {
                tracing::warn!("SESSION_STORE_UNREADABLE | error={}", e);
                self.invalidate(InvalidationReason::StoreUnavailable);
                return;
            }
            Ok(Some(last)) if now.signed_duration_since(last) >= self.config.idle_window() => {
                tracing::info!(
                    "SESSION_STALE_ON_LOAD | idle_for={}s window={}s",
                    now.signed_duration_since(last).num_seconds(),
                    self.config.idle_window_secs
                );
                self.invalidate(InvalidationReason::ExpiredBeforeLoad);
                return;
            }
            Ok(_) => {}
        }

        self.state = GuardState::Active;
        self.remaining_secs = self.config.idle_window_secs;
        self.last_activity = Some(now);
        self.warning_issued = false;
        self.persist_activity(now, true);
        self.mirror_remaining();
        self.ticker.start(self.config.tick_interval());

        let event = GuardEvent::Activated {
            identity_id: self.identity_id().unwrap_or_default(),
            employee_ref: self
                .identity
                .as_ref()
                .and_then(|i| i.employee_ref.clone())
                .unwrap_or_default(),
            timestamp: now,
            remaining_secs: self.remaining_secs,
        };
        tracing::info!("{}", event.to_audit_string());
    }

    /// Click, pointer move or key press anywhere on the screen. Resets the
    /// countdown to the full window. Ignored outside `Active`.
    pub fn record_activity(&mut self, kind: ActivityKind) {
        if self.state != GuardState::Active {
            tracing::trace!("SESSION_ACTIVITY_IGNORED | state={} activity={}", self.state, kind);
            return;
        }

        let now = self.clock.now();
        self.remaining_secs = self.config.idle_window_secs;
        self.last_activity = Some(now);
        self.warning_issued = false;
        if self.persist_activity(now, false) {
            self.mirror_remaining();
        }

        let event = GuardEvent::Refreshed {
            identity_id: self.identity_id().unwrap_or_default(),
            activity: kind,
            timestamp: now,
        };
        if kind == ActivityKind::PointerMove {
            tracing::trace!("{}", event.to_audit_string());
        } else {
            tracing::debug!("{}", event.to_audit_string());
        }
    }

    /// One countdown tick. Reaching zero expires the session.
    ///
    /// A tick takes one second off, but never leaves more than the clock
    /// says is left since the last activity. Ticks lost while the process
    /// was suspended therefore cannot keep an idle session alive.
    pub fn tick(&mut self) {
        if self.state != GuardState::Active {
            return;
        }

        let counted = self.remaining_secs.saturating_sub(1);
        self.remaining_secs = counted.min(self.clock_remaining_secs());
        if self.remaining_secs < counted {
            tracing::debug!(
                "SESSION_CLOCK_CATCHUP | counted={}s clock={}s",
                counted,
                self.remaining_secs
            );
        }
        if self.remaining_secs > 0 && self.remaining_secs % MIRROR_EVERY_SECS == 0 {
            self.mirror_remaining();
        }

        if self.remaining_secs == 0 {
            self.state = GuardState::Expiring;
            let event = GuardEvent::Expiring {
                identity_id: self.identity_id().unwrap_or_default(),
                timestamp: self.clock.now(),
            };
            tracing::info!("{}", event.to_audit_string());
            self.invalidate(InvalidationReason::IdleTimeout);
            return;
        }

        if self.in_warning_period() && !self.warning_issued {
            self.warning_issued = true;
            let event = GuardEvent::WarningIssued {
                identity_id: self.identity_id().unwrap_or_default(),
                timestamp: self.clock.now(),
                expires_in_secs: self.remaining_secs,
            };
            tracing::warn!("{}", event.to_audit_string());
        }
    }

    /// Explicit user logout. Valid from any live state.
    pub fn logout(&mut self) {
        if self.state.is_finished() {
            return;
        }

        self.state = GuardState::Terminated;
        let route = self
            .config
            .routes
            .end_session_for(self.identity.as_ref())
            .to_string();
        let event = GuardEvent::Terminated {
            identity_id: self.identity_id(),
            timestamp: self.clock.now(),
            route: route.clone(),
        };
        tracing::info!("{}", event.to_audit_string());
        self.end_session(&route);
    }

    /// The owning screen is going away. Stops the countdown without ending
    /// the session; the persisted timestamp stays for the next load.
    pub fn unmount(&mut self) {
        if self.ticker.is_running() {
            tracing::debug!(
                "SESSION_UNMOUNTED | identity={} remaining={}s",
                self.identity_id().unwrap_or_default(),
                self.remaining_secs
            );
        }
        self.ticker.cancel();
    }

    /// Within the warning period before expiry.
    pub fn in_warning_period(&self) -> bool {
        self.state == GuardState::Active
            && self.remaining_secs > 0
            && self.remaining_secs <= self.config.warning_before_timeout_secs
    }

    /// Countdown as `MM:SS`.
    pub fn countdown_display(&self) -> String {
        format!("{:02}:{:02}", self.remaining_secs / 60, self.remaining_secs % 60)
    }

    /// Seconds left of the idle window by the clock alone.
    fn clock_remaining_secs(&self) -> u64 {
        let Some(last) = self.last_activity else {
            return self.remaining_secs;
        };
        let idle = self.clock.now().signed_duration_since(last).num_seconds();
        let left = (self.config.idle_window_secs as i64).saturating_sub(idle);
        left.clamp(0, self.config.idle_window_secs as i64) as u64
    }

    fn identity_id(&self) -> Option<String> {
        self.identity.as_ref().map(|i| i.id.clone())
    }

    /// Returns `true` when the timestamp was written.
    fn persist_activity(&mut self, now: DateTime<Utc>, force: bool) -> bool {
        let due = force
            || self.last_persisted.map_or(true, |last| {
                now.signed_duration_since(last).num_milliseconds() >= PERSIST_GRANULARITY_MS
            });
        if !due {
            return false;
        }

        match self.store.record_activity(now) {
            Ok(()) => {
                self.last_persisted = Some(now);
                true
            }
            Err(e) => {
                tracing::warn!("SESSION_STORE_WRITE_FAILED | key=last_activity error={}", e);
                false
            }
        }
    }

    fn mirror_remaining(&mut self) {
        let Some(id) = self.identity.as_ref().map(|i| i.id.as_str()) else {
            return;
        };
        if let Err(e) = self.store.record_remaining(id, self.remaining_secs) {
            tracing::debug!("SESSION_STORE_WRITE_FAILED | key=remaining error={}", e);
        }
    }

    fn invalidate(&mut self, reason: InvalidationReason) {
        if self.state.is_finished() {
            return;
        }

        self.state = GuardState::Invalid;
        self.invalidation = Some(reason);

        let route = if reason.is_stale_identity() {
            self.config.routes.stale_identity.clone()
        } else {
            self.config
                .routes
                .end_session_for(self.identity.as_ref())
                .to_string()
        };
        let event = GuardEvent::Invalidated {
            identity_id: self.identity_id(),
            timestamp: self.clock.now(),
            reason,
            route: route.clone(),
        };
        tracing::info!("{}", event.to_audit_string());
        self.end_session(&route);
    }

    fn end_session(&mut self, route: &str) {
        self.ticker.cancel();
        self.navigator.clear_credentials();
        if let Err(e) = self.store.clear() {
            tracing::warn!("SESSION_STORE_CLEAR_FAILED | error={}", e);
        }
        self.identity = None;
        self.remaining_secs = 0;
        self.last_activity = None;
        self.last_persisted = None;
        self.navigator.redirect(route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{LoginStatus, Registration, Role};
    use crate::security::clock::ManualClock;
    use crate::security::navigator::RecordingNavigator;
    use crate::security::store::MemoryActivityStore;
    use crate::security::ticker::ManualTicker;
    use chrono::Duration as ChronoDuration;

    type TestGuard =
        SessionGuard<MemoryActivityStore, RecordingNavigator, ManualTicker, ManualClock>;

    fn officer() -> Identity {
        Identity::new("u-42", "EMP-42", Role::new("r-officer", "Officer", ["Crops:Read"]))
    }

    fn guard_with(store: MemoryActivityStore, clock: ManualClock) -> TestGuard {
        SessionGuard::new(
            SessionConfig::default(),
            store,
            RecordingNavigator::new(),
            ManualTicker::new(),
            clock,
        )
    }

    fn active_guard() -> (TestGuard, ManualClock) {
        let clock = ManualClock::default();
        let mut guard = guard_with(MemoryActivityStore::default(), clock.clone());
        guard.resolve(Ok(Some(officer())));
        (guard, clock)
    }

    fn tick_seconds(guard: &mut TestGuard, clock: &ManualClock, seconds: u64) {
        for _ in 0..seconds {
            clock.advance(ChronoDuration::seconds(1));
            guard.tick();
        }
    }

    #[test]
    fn test_resolves_to_active() {
        let (guard, _) = active_guard();
        assert_eq!(guard.state(), GuardState::Active);
        assert_eq!(guard.remaining_secs(), 900);
        assert!(guard.ticker().is_running());
        assert_eq!(guard.ticker().period(), Some(Duration::from_millis(970)));
        assert!(guard.store().last_activity().unwrap().is_some());
        assert_eq!(guard.store().get("farmgate.remaining.u-42").as_deref(), Some("900"));
    }

    #[test]
    fn test_fetch_error_invalidates() {
        let mut guard = guard_with(MemoryActivityStore::default(), ManualClock::default());
        guard.resolve(Err(IdentityError::Transport("connection refused".to_string())));

        assert_eq!(guard.state(), GuardState::Invalid);
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::FetchFailed));
        assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
        assert_eq!(guard.ticker().starts(), 0);
    }

    #[test]
    fn test_absent_identity_invalidates() {
        let mut guard = guard_with(MemoryActivityStore::default(), ManualClock::default());
        guard.resolve(Ok(None));
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IdentityAbsent));
    }

    #[test]
    fn test_incomplete_identity_goes_to_stale_route() {
        let mut identity = officer();
        identity.employee_ref = None;

        let mut guard = guard_with(MemoryActivityStore::default(), ManualClock::default());
        guard.resolve(Ok(Some(identity)));

        assert_eq!(guard.state(), GuardState::Invalid);
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IncompleteIdentity));
        assert_eq!(guard.navigator().last_redirect(), Some("/logout?reason=stale"));
    }

    #[test]
    fn test_remote_logout_flag_invalidates() {
        let mut guard = guard_with(MemoryActivityStore::default(), ManualClock::default());
        guard.resolve(Ok(Some(officer().with_login_status(LoginStatus::Logout))));

        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::LoggedOutRemotely));
        assert_eq!(guard.navigator().last_redirect(), Some("/logout?reason=stale"));
        assert!(guard.identity().is_none());
    }

    #[test]
    fn test_second_resolution_is_ignored() {
        let (mut guard, _) = active_guard();
        guard.resolve(Err(IdentityError::Status(500)));
        assert_eq!(guard.state(), GuardState::Active);
        assert!(guard.navigator().redirects.is_empty());
    }

    #[test]
    fn test_idle_expiry_redirects_exactly_once() {
        let (mut guard, clock) = active_guard();

        tick_seconds(&mut guard, &clock, 899);
        assert_eq!(guard.state(), GuardState::Active);
        assert_eq!(guard.remaining_secs(), 1);

        tick_seconds(&mut guard, &clock, 1);
        assert_eq!(guard.state(), GuardState::Invalid);
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IdleTimeout));

        tick_seconds(&mut guard, &clock, 30);
        guard.record_activity(ActivityKind::Click);
        guard.logout();

        assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
        assert_eq!(guard.navigator().credential_clears, 1);
        assert!(!guard.ticker().is_running());
        assert!(guard.store().is_empty());
    }

    #[test]
    fn test_activity_resets_countdown() {
        let (mut guard, clock) = active_guard();

        tick_seconds(&mut guard, &clock, 10);
        assert_eq!(guard.remaining_secs(), 890);

        guard.record_activity(ActivityKind::Click);
        assert_eq!(guard.remaining_secs(), 900);

        tick_seconds(&mut guard, &clock, 895);
        assert_eq!(guard.state(), GuardState::Active);
        assert_eq!(guard.remaining_secs(), 5);
    }

    #[test]
    fn test_activity_refreshes_persisted_timestamp() {
        let (mut guard, clock) = active_guard();
        let first = guard.store().last_activity().unwrap().unwrap();

        clock.advance(ChronoDuration::seconds(42));
        guard.record_activity(ActivityKind::KeyPress);

        let second = guard.store().last_activity().unwrap().unwrap();
        assert_eq!(second - first, ChronoDuration::seconds(42));
    }

    #[test]
    fn test_pointer_move_storm_is_coalesced() {
        let (mut guard, clock) = active_guard();
        let start = guard.store().last_activity().unwrap().unwrap();

        for _ in 0..50 {
            clock.advance(ChronoDuration::milliseconds(10));
            guard.record_activity(ActivityKind::PointerMove);
        }
        assert_eq!(guard.store().last_activity().unwrap(), Some(start));
        assert_eq!(guard.remaining_secs(), 900);

        clock.advance(ChronoDuration::milliseconds(600));
        guard.record_activity(ActivityKind::PointerMove);
        let persisted = guard.store().last_activity().unwrap().unwrap();
        assert_eq!(persisted - start, ChronoDuration::milliseconds(1100));
    }

    #[test]
    fn test_activity_before_tick_wins_at_zero_boundary() {
        let (mut guard, clock) = active_guard();
        tick_seconds(&mut guard, &clock, 899);

        guard.record_activity(ActivityKind::PointerMove);
        guard.tick();

        assert_eq!(guard.state(), GuardState::Active);
        assert_eq!(guard.remaining_secs(), 899);
    }

    #[test]
    fn test_tick_before_activity_expires() {
        let (mut guard, clock) = active_guard();
        tick_seconds(&mut guard, &clock, 899);

        guard.tick();
        guard.record_activity(ActivityKind::PointerMove);

        assert_eq!(guard.state(), GuardState::Invalid);
        assert_eq!(guard.navigator().redirects.len(), 1);
    }

    #[test]
    fn test_reload_carries_expiry() {
        let clock = ManualClock::default();
        let store = MemoryActivityStore::default();
        store.record_activity(clock.now() - ChronoDuration::minutes(20)).unwrap();

        let mut guard = guard_with(store, clock);
        guard.resolve(Ok(Some(officer())));

        assert_eq!(guard.state(), GuardState::Invalid);
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::ExpiredBeforeLoad));
        assert_eq!(guard.ticker().starts(), 0);
        assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
    }

    #[test]
    fn test_reload_inside_window_restarts_full_countdown() {
        let clock = ManualClock::default();
        let store = MemoryActivityStore::default();
        store.record_activity(clock.now() - ChronoDuration::minutes(14)).unwrap();

        let mut guard = guard_with(store, clock.clone());
        guard.resolve(Ok(Some(officer())));

        assert_eq!(guard.state(), GuardState::Active);
        assert_eq!(guard.remaining_secs(), 900);
        let persisted = guard.store().last_activity().unwrap().unwrap();
        assert!((clock.now() - persisted).num_milliseconds().abs() <= 1);
    }

    #[test]
    fn test_exactly_at_window_boundary_is_expired() {
        let clock = ManualClock::default();
        let store = MemoryActivityStore::default();
        store.record_activity(clock.now() - ChronoDuration::seconds(900)).unwrap();

        let mut guard = guard_with(store, clock);
        guard.resolve(Ok(Some(officer())));
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::ExpiredBeforeLoad));
    }

    #[test]
    fn test_unreadable_store_fails_closed() {
        let store = MemoryActivityStore::default();
        store.set_raw("farmgate.lastActivity", "garbage");

        let mut guard = guard_with(store, ManualClock::default());
        guard.resolve(Ok(Some(officer())));

        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::StoreUnavailable));
        assert!(guard.store().is_empty());
    }

    #[test]
    fn test_logout_terminates() {
        let (mut guard, _) = active_guard();
        guard.logout();

        assert_eq!(guard.state(), GuardState::Terminated);
        assert_eq!(guard.invalidation_reason(), None);
        assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
        assert_eq!(guard.navigator().clears_before_redirect, vec![1]);
        assert!(!guard.ticker().is_running());
        assert!(guard.store().is_empty());

        guard.logout();
        assert_eq!(guard.navigator().redirects.len(), 1);
    }

    #[test]
    fn test_logout_while_resolving() {
        let mut guard = guard_with(MemoryActivityStore::default(), ManualClock::default());
        guard.logout();
        assert_eq!(guard.state(), GuardState::Terminated);

        guard.resolve(Ok(Some(officer())));
        assert_eq!(guard.state(), GuardState::Terminated);
        assert_eq!(guard.navigator().redirects.len(), 1);
    }

    #[test]
    fn test_unmount_stops_ticker_but_keeps_timestamp() {
        let (mut guard, _) = active_guard();
        guard.unmount();

        assert!(!guard.ticker().is_running());
        assert_eq!(guard.state(), GuardState::Active);
        assert!(guard.store().last_activity().unwrap().is_some());
        assert!(guard.navigator().redirects.is_empty());
    }

    #[test]
    fn test_privileges_follow_session_state() {
        let (mut guard, _) = active_guard();
        assert!(!guard.lacks_privilege(&["Crops:Read"]));
        assert!(guard.lacks_privilege(&["Crops:Delete"]));

        guard.logout();
        assert!(guard.lacks_privilege(&["Crops:Read"]));
    }

    #[test]
    fn test_warning_period_and_display() {
        let (mut guard, clock) = active_guard();
        assert_eq!(guard.countdown_display(), "15:00");
        assert!(!guard.in_warning_period());

        tick_seconds(&mut guard, &clock, 780);
        assert_eq!(guard.countdown_display(), "02:00");
        assert!(guard.in_warning_period());

        guard.record_activity(ActivityKind::KeyPress);
        assert!(!guard.in_warning_period());
    }

    #[test]
    fn test_suspended_process_expires_on_next_tick() {
        let (mut guard, clock) = active_guard();
        tick_seconds(&mut guard, &clock, 5);

        clock.advance(ChronoDuration::minutes(60));
        guard.tick();

        assert_eq!(guard.state(), GuardState::Invalid);
        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IdleTimeout));
        assert_eq!(guard.navigator().redirects, vec!["/logout".to_string()]);
    }

    #[test]
    fn test_missed_ticks_inside_window_catch_up() {
        let (mut guard, clock) = active_guard();

        clock.advance(ChronoDuration::seconds(300));
        guard.tick();

        assert_eq!(guard.state(), GuardState::Active);
        assert_eq!(guard.remaining_secs(), 600);
    }

    #[test]
    fn test_remaining_mirror_is_throttled() {
        let (mut guard, clock) = active_guard();

        tick_seconds(&mut guard, &clock, 10);
        assert_eq!(guard.store().get("farmgate.remaining.u-42").as_deref(), Some("900"));

        tick_seconds(&mut guard, &clock, 20);
        assert_eq!(guard.store().get("farmgate.remaining.u-42").as_deref(), Some("870"));

        tick_seconds(&mut guard, &clock, 5);
        guard.record_activity(ActivityKind::Click);
        assert_eq!(guard.store().get("farmgate.remaining.u-42").as_deref(), Some("900"));
    }

    #[test]
    fn test_self_service_account_uses_its_own_route() {
        let config = SessionConfig {
            routes: RedirectRoutes {
                self_service_end_session: Some("/farmer/logout".to_string()),
                ..RedirectRoutes::default()
            },
            ..SessionConfig::default()
        };
        let clock = ManualClock::default();
        let mut guard = SessionGuard::new(
            config,
            MemoryActivityStore::default(),
            RecordingNavigator::new(),
            ManualTicker::new(),
            clock.clone(),
        );
        guard.resolve(Ok(Some(officer().with_registration(Registration::Farmer))));
        tick_seconds(&mut guard, &clock, 900);

        assert_eq!(guard.invalidation_reason(), Some(InvalidationReason::IdleTimeout));
        assert_eq!(guard.navigator().redirects, vec!["/farmer/logout".to_string()]);
    }

    #[test]
    fn test_config_validation() {
        let config = SessionConfig::custom(0, 1500);
        assert_eq!(config.idle_window_secs, 1);
        assert_eq!(config.tick_interval_ms, 999);
        assert_eq!(config.warning_before_timeout_secs, 0);

        let config = SessionConfig::custom(10 * 86_400, 970);
        assert_eq!(config.idle_window_secs, MAX_IDLE_WINDOW_SECS);
        assert_eq!(config.tick_interval(), Duration::from_millis(970));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(GuardState::Resolving.to_string(), "RESOLVING");
        assert_eq!(GuardState::Expiring.to_string(), "EXPIRING");
        assert!(GuardState::Terminated.is_finished());
        assert!(!GuardState::Active.is_finished());
    }

    #[test]
    fn test_event_audit_string() {
        let event = GuardEvent::Invalidated {
            identity_id: Some("u-42".to_string()),
            timestamp: Utc::now(),
            reason: InvalidationReason::IdleTimeout,
            route: "/logout".to_string(),
        };
        let line = event.to_audit_string();
        assert!(line.contains("SESSION_INVALID"));
        assert!(line.contains("identity=u-42"));
        assert!(line.contains("reason=idle_timeout"));

        let anonymous = GuardEvent::Terminated {
            identity_id: None,
            timestamp: Utc::now(),
            route: "/logout".to_string(),
        };
        assert!(anonymous.to_audit_string().contains("identity=-"));
    }
}
