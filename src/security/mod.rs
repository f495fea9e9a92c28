// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session and privilege controls for protected screens.
//!
//! ## Key Controls
//!
//! - **Idle timeout**: 15-minute (900 second) inactivity window, counted down
//!   by a sub-second ticker and reset by any click, pointer move or key press
//! - **Reload carry-over**: the last-activity timestamp is persisted, so a
//!   reload cannot restart an already-expired session
//! - **Single redirect**: every terminal path clears credentials and issues
//!   exactly one redirect
//! - **Privilege gating**: any-of checks against the resolved role, with a
//!   super-user bypass
//! - **Audit Logging**: all session transitions are logged through `tracing`
//!
//! ## Usage
//!
//! ```no_run
//! use farmgate::identity::{Identity, Role};
//! use farmgate::security::{
//!     ManualTicker, MemoryActivityStore, RecordingNavigator, SessionConfig, SessionGuard,
//!     SystemClock,
//! };
//!
//! let mut guard = SessionGuard::new(
//!     SessionConfig::default(),
//!     MemoryActivityStore::default(),
//!     RecordingNavigator::new(),
//!     ManualTicker::new(),
//!     SystemClock,
//! );
//!
//! let officer = Identity::new("u-1", "EMP-1", Role::new("r-1", "Officer", ["Crops:Read"]));
//! guard.resolve(Ok(Some(officer)));
//!
//! if guard.lacks_privilege(&["Crops:Update"]) {
//!     // hide the edit controls
//! }
//! ```

pub mod clock;
pub mod driver;
pub mod locks;
pub mod navigator;
pub mod privilege;
pub mod session_guard;
pub mod store;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{screen_channels, GuardDriver, ScreenEvent, ScreenHandle};
pub use locks::{resilient_read, resilient_write};
pub use navigator::{Navigator, RecordingNavigator, RedirectRoutes};
pub use privilege::{has_privilege, lacks_privilege, Action, Privilege, PrivilegeParseError};
pub use session_guard::{
    ActivityKind, GuardEvent, GuardState, InvalidationReason, SessionConfig, SessionGuard,
    DEFAULT_IDLE_WINDOW_SECS, DEFAULT_TICK_INTERVAL_MS, DEFAULT_WARNING_BEFORE_TIMEOUT_SECS,
};
pub use store::{ActivityStore, FileActivityStore, MemoryActivityStore, StorageKeys, StoreError};
pub use ticker::{ManualTicker, TickSender, Ticker, TokioTicker};
