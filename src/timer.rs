//! Periodic timers driven by explicit `now` values.
//!
//! Timers do not run on their own. The owner calls [`PeriodicTimer::poll`]
//! from its tick loop and acts when it returns `true`. A timer that missed
//! several periods (the process was suspended, the REPL sat idle) fires once
//! and schedules the next period after `now`.

use chrono::{DateTime, Duration, Utc};

/// Countdown cadence
pub const COUNTDOWN_INTERVAL_SECS: i64 = 1;

#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    interval: Duration,
    next_due: Option<DateTime<Utc>>,
}

impl PeriodicTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn every_secs(secs: u64) -> Self {
        Self::new(Duration::seconds(secs.max(1) as i64))
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.next_due = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.next_due
    }

    /// Returns `true` if the timer is due at `now`.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }

        let interval_ms = self.interval.num_milliseconds().max(1);
        let missed = (now - due).num_milliseconds() / interval_ms;
        self.next_due = Some(due + Duration::milliseconds(interval_ms * (missed + 1)));
        true
    }
}

/// The periodic timers that live exactly as long as an open session
#[derive(Debug, Clone)]
pub struct SessionTimers {
    pub countdown: PeriodicTimer,
    pub discovery: PeriodicTimer,
    pub location: PeriodicTimer,
}

impl SessionTimers {
    pub fn new(discovery_secs: u64, location_secs: u64) -> Self {
        Self {
            countdown: PeriodicTimer::every_secs(COUNTDOWN_INTERVAL_SECS as u64),
            discovery: PeriodicTimer::every_secs(discovery_secs),
            location: PeriodicTimer::every_secs(location_secs),
        }
    }

    pub fn start_all(&mut self, now: DateTime<Utc>) {
        self.countdown.start(now);
        self.discovery.start(now);
        self.location.start(now);
    }

    pub fn cancel_all(&mut self) {
        self.countdown.cancel();
        self.discovery.cancel();
        self.location.cancel();
    }

    pub fn any_active(&self) -> bool {
        self.countdown.is_active() || self.discovery.is_active() || self.location.is_active()
    }
}
