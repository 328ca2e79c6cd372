// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of iceoryx's `posix::PeriodicTimer` (posix_wrapper/periodic_timer.cpp),
// per SPEC_FULL.md §4.9. The original blocks on an unnamed semaphore so
// `stop()` can wake a waiter early; this port gets the same interruptible
// wait from a `Condvar` over a stop flag, which is the idiomatic
// same-process equivalent and needs no OS semaphore at all.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// How `wait` behaves when it discovers the timer is already behind
/// schedule (the caller took longer than `interval` between calls).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCatchupPolicy {
    /// Fire immediately and resynchronize to now — the timer permanently
    /// shifts phase and never tries to catch up on missed ticks.
    ImmediateTick,
    /// Skip forward to the next tick boundary that is still in the
    /// future, firing once for the whole missed span.
    SkipToNextTick,
    /// Fire immediately and report how late this tick is; the schedule
    /// itself is not adjusted.
    Delay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Tick,
    Delay,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    pub state: TimerState,
    pub time_delay: Duration,
}

/// A restartable, stoppable periodic wait. `wait` blocks the calling
/// thread until the next tick (or returns immediately with
/// `TimerState::Stop` if [`Self::stop`] was called).
pub struct PeriodicTimer {
    interval: Mutex<Duration>,
    next_activation: Mutex<Instant>,
    stopped: Mutex<bool>,
    cv: Condvar,
}

impl PeriodicTimer {
    pub fn new(interval: Duration) -> Self {
        let timer = Self {
            interval: Mutex::new(interval),
            next_activation: Mutex::new(Instant::now()),
            stopped: Mutex::new(true),
            cv: Condvar::new(),
        };
        timer.start();
        timer
    }

    fn interval(&self) -> Duration {
        *self.interval.lock().unwrap()
    }

    /// (Re)arms the timer, keeping the current interval.
    pub fn start(&self) {
        *self.stopped.lock().unwrap() = false;
        *self.next_activation.lock().unwrap() = Instant::now() + self.interval();
    }

    /// (Re)arms the timer with a new interval.
    pub fn start_with_interval(&self, interval: Duration) {
        *self.interval.lock().unwrap() = interval;
        self.start();
    }

    /// Disarms the timer and wakes any thread currently blocked in `wait`.
    pub fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.cv.notify_all();
    }

    /// Blocks until the next tick, applying `policy` if this call finds
    /// the timer already behind schedule. Returns `TimerState::Stop`
    /// immediately if the timer is stopped.
    pub fn wait(&self, policy: TimerCatchupPolicy) -> WaitResult {
        if *self.stopped.lock().unwrap() {
            return WaitResult {
                state: TimerState::Stop,
                time_delay: Duration::ZERO,
            };
        }

        let now = Instant::now();
        let mut next = self.next_activation.lock().unwrap();
        let interval = self.interval();

        if now <= *next {
            let remaining = next.saturating_duration_since(now);
            let target = *next + interval;
            drop(next);
            self.sleep_interruptible(remaining);
            *self.next_activation.lock().unwrap() = target;
            return WaitResult {
                state: TimerState::Tick,
                time_delay: Duration::ZERO,
            };
        }

        match policy {
            TimerCatchupPolicy::ImmediateTick => {
                *next = Instant::now();
                WaitResult {
                    state: TimerState::Tick,
                    time_delay: Duration::ZERO,
                }
            }
            TimerCatchupPolicy::SkipToNextTick => {
                let behind = now.saturating_duration_since(*next);
                if behind > interval && interval > Duration::ZERO {
                    let missed_slots = behind.as_millis() / interval.as_millis().max(1);
                    *next += interval * missed_slots as u32;
                } else {
                    *next += interval;
                }
                let remaining = next.saturating_duration_since(Instant::now());
                drop(next);
                self.sleep_interruptible(remaining);
                WaitResult {
                    state: TimerState::Tick,
                    time_delay: Duration::ZERO,
                }
            }
            TimerCatchupPolicy::Delay => {
                let behind = now.saturating_duration_since(*next);
                WaitResult {
                    state: TimerState::Delay,
                    time_delay: behind,
                }
            }
        }
    }

    fn sleep_interruptible(&self, d: Duration) {
        let stopped = self.stopped.lock().unwrap();
        if *stopped {
            return;
        }
        let _ = self.cv.wait_timeout(stopped, d);
    }
}
