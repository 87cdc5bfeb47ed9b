use chrono::{DateTime, TimeDelta, Utc};
use std::{sync::Mutex, time::Duration};

/// Source of wall-clock readings for time budgets.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Time elapsed since `start`, zero if `start` lies in the future.
    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.now() - start).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// With an auto-advance step, every reading returns the current instant and
/// then moves the clock forward by the step, so each observation "costs" a
/// fixed amount of time.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    step: TimeDelta,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            step: TimeDelta::zero(),
        }
    }

    pub fn with_auto_advance(mut self, step: Duration) -> Self {
        self.step = TimeDelta::from_std(step).unwrap_or(TimeDelta::MAX);
        self
    }

    pub fn advance(&self, by: Duration) {
        let by = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    /// Current instant without consuming an auto-advance step.
    pub fn peek(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        let reading = *now;
        *now += self.step;
        reading
    }
}
