//! Time sources
use super::invoice::TimeStamp;
use chrono::{TimeDelta, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> TimeStamp<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::new()
    }
}

/// A clock that only moves when told to. Used by simulations and tests that
/// need to cross due dates.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    pub fn starting_at(start: &TimeStamp<Utc>) -> Self {
        Self {
            nanos: AtomicI64::new(start.to_datetime_utc().timestamp_nanos_opt().unwrap_or(0)),
        }
    }

    pub fn set(&self, to: &TimeStamp<Utc>) {
        if let Some(nanos) = to.to_datetime_utc().timestamp_nanos_opt() {
            self.nanos.store(nanos, Ordering::SeqCst);
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let delta = by.num_nanoseconds().unwrap_or(i64::MAX);
        let _ = self
            .nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                Some(cur.saturating_add(delta))
            });
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimeStamp<Utc> {
        TimeStamp::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::starting_at(&start);
        assert_eq!(clock.now(), start);

        clock.advance(TimeDelta::days(2));
        assert_eq!(clock.now(), TimeStamp::new_with(2025, 1, 3, 0, 0, 0).unwrap());
    }
}
