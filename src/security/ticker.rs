// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Countdown timers.
//!
//! The guard owns its ticker and starts it on entry to `Active`. Every exit
//! path (invalidation, logout, unmount) cancels it, so a torn-down screen
//! never keeps a timer firing redirects.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Sender half that receives one `()` per countdown tick.
pub type TickSender = mpsc::UnboundedSender<()>;

pub trait Ticker {
    /// Start ticking every `period`. Restarting replaces any running timer.
    fn start(&mut self, period: Duration);

    /// Stop ticking. Idempotent.
    fn cancel(&mut self);

    fn is_running(&self) -> bool;
}

/// Ticker that never fires on its own; the caller delivers ticks by hand.
/// Records how it was driven so tests can assert on it.
#[derive(Debug, Clone, Default)]
pub struct ManualTicker {
    running: bool,
    period: Option<Duration>,
    starts: u32,
    cancels: u32,
}

impl ManualTicker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn starts(&self) -> u32 {
        self.starts
    }

    pub fn cancels(&self) -> u32 {
        self.cancels
    }
}

impl Ticker for ManualTicker {
    fn start(&mut self, period: Duration) {
        self.running = true;
        self.period = Some(period);
        self.starts += 1;
    }

    fn cancel(&mut self) {
        if self.running {
            self.cancels += 1;
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// Interval task on the current tokio runtime. The first tick fires one full
/// period after `start`. Aborted on `cancel` and on drop.
#[derive(Debug)]
pub struct TokioTicker {
    tx: TickSender,
    task: Option<JoinHandle<()>>,
}

impl TokioTicker {
    pub fn new(tx: TickSender) -> Self {
        Self { tx, task: None }
    }
}

impl Ticker for TokioTicker {
    fn start(&mut self, period: Duration) {
        self.cancel();

        let tx = self.tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(()).is_err() {
                    break;
                }
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for TokioTicker {
    fn drop(&mut self) {
        self.cancel();
    }
}
