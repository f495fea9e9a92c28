// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event loop that feeds a [`SessionGuard`].
//!
//! Screen events and countdown ticks arrive on two channels. The loop polls
//! screen events first, so activity that is already queued when a tick
//! becomes ready is applied before that tick. Dropping every
//! [`ScreenHandle`] counts as unmounting the screen.

use tokio::sync::mpsc;

use super::clock::Clock;
use super::navigator::Navigator;
use super::session_guard::{ActivityKind, SessionGuard};
use super::store::ActivityStore;
use super::ticker::{TickSender, Ticker};
use crate::identity::IdentitySource;

/// Something that happened on the protected screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenEvent {
    Activity(ActivityKind),
    Logout,
}

/// Cloneable sender for screen events.
#[derive(Debug, Clone)]
pub struct ScreenHandle {
    tx: mpsc::UnboundedSender<ScreenEvent>,
}

impl ScreenHandle {
    /// Returns `false` once the driver has stopped.
    pub fn activity(&self, kind: ActivityKind) -> bool {
        self.tx.send(ScreenEvent::Activity(kind)).is_ok()
    }

    pub fn logout(&self) -> bool {
        self.tx.send(ScreenEvent::Logout).is_ok()
    }
}

pub struct GuardDriver {
    events: mpsc::UnboundedReceiver<ScreenEvent>,
    ticks: mpsc::UnboundedReceiver<()>,
}

/// Wire up a screen: the handle goes to the UI, the tick sender to a
/// [`TokioTicker`](super::ticker::TokioTicker), the driver to [`GuardDriver::run`].
pub fn screen_channels() -> (ScreenHandle, TickSender, GuardDriver) {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (tick_tx, ticks) = mpsc::unbounded_channel();
    (
        ScreenHandle { tx: event_tx },
        tick_tx,
        GuardDriver { events, ticks },
    )
}

impl GuardDriver {
    /// Resolve the identity, then apply events until the session ends or the
    /// screen goes away. Returns the guard for inspection.
    pub async fn run<S, N, T, C, I>(
        mut self,
        mut guard: SessionGuard<S, N, T, C>,
        source: &I,
    ) -> SessionGuard<S, N, T, C>
    where
        S: ActivityStore,
        N: Navigator,
        T: Ticker,
        C: Clock,
        I: IdentitySource,
    {
        let fetch = source.fetch_identity();
        tokio::pin!(fetch);
        loop {
            tokio::select! {
                biased;

                outcome = &mut fetch => {
                    guard.resolve(outcome);
                    break;
                }
                event = self.events.recv() => match event {
                    // Ignored by the guard until the session is active.
                    Some(ScreenEvent::Activity(kind)) => guard.record_activity(kind),
                    Some(ScreenEvent::Logout) => {
                        guard.logout();
                        break;
                    }
                    None => {
                        guard.unmount();
                        return guard;
                    }
                },
            }
        }

        while !guard.state().is_finished() {
            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(ScreenEvent::Activity(kind)) => guard.record_activity(kind),
                    Some(ScreenEvent::Logout) => guard.logout(),
                    None => break,
                },
                tick = self.ticks.recv() => match tick {
                    Some(()) => guard.tick(),
                    None => break,
                },
            }
        }

        guard.unmount();
        guard
    }
}
