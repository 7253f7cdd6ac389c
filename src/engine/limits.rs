//! Cross-pool shared counters: the hourly trade limiter and the monitor
//! slot cap. These are the only mutable state shared across pools.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Hourly trade limiter with wall-clock hour-boundary reset.
///
/// Admission counts against the hour the submission lands in; when the hour
/// changes the window resets to zero. Rejections do not consume budget.
#[derive(Debug)]
pub struct HourlyRateLimiter {
    limit: u32,
    window: Mutex<HourWindow>,
}

#[derive(Debug, Clone, Copy)]
struct HourWindow {
    /// Hours since epoch identifying the current window
    hour_key: i64,
    count: u32,
}

fn hour_key(now: DateTime<Utc>) -> i64 {
    now.timestamp() / 3600
}

impl HourlyRateLimiter {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Mutex::new(HourWindow {
                hour_key: hour_key(Utc::now()),
                count: 0,
            }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Try to consume one unit of this hour's budget.
    /// Returns `Err(current_count)` when the window is exhausted.
    pub fn try_acquire(&self) -> Result<(), u32> {
        self.try_acquire_at(Utc::now())
    }

    /// Clock-injected variant for tests
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> Result<(), u32> {
        let mut window = self.window.lock().expect("rate limiter mutex poisoned");

        let key = hour_key(now);
        if window.hour_key != key {
            window.hour_key = key;
            window.count = 0;
        }

        if window.count >= self.limit {
            return Err(window.count);
        }

        window.count += 1;
        Ok(())
    }

    /// Trades admitted in the current window
    pub fn current(&self) -> u32 {
        let window = self.window.lock().expect("rate limiter mutex poisoned");
        if window.hour_key == hour_key(Utc::now()) {
            window.count
        } else {
            0
        }
    }
}

/// Cap on pools simultaneously holding a monitor (Monitoring or Trading).
///
/// Plain counting semaphore without queuing: a pool that cannot get a slot
/// expires immediately rather than waiting, so `try_acquire` never blocks.
#[derive(Debug)]
pub struct MonitorSlots {
    capacity: usize,
    active: AtomicUsize,
}

impl MonitorSlots {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Claim a slot; false when all slots are busy.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.active.load(Ordering::SeqCst);
        loop {
            if current >= self.capacity {
                return false;
            }
            match self.active.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Release a slot taken with `try_acquire`. Must be called exactly once
    /// per successful acquire (terminal pool transitions own this).
    pub fn release(&self) {
        let prev = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "monitor slot released without acquire");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_rate_limit_exhausts_and_rejects() {
        let limiter = HourlyRateLimiter::new(10);
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 14, 5, 0).unwrap();

        for _ in 0..10 {
            assert!(limiter.try_acquire_at(now).is_ok());
        }
        // 11th request in the same hour is rejected
        assert_eq!(limiter.try_acquire_at(now), Err(10));
    }

    #[test]
    fn test_rate_limit_resets_on_hour_boundary() {
        let limiter = HourlyRateLimiter::new(2);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 14, 59, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 1).unwrap();

        assert!(limiter.try_acquire_at(t0).is_ok());
        assert!(limiter.try_acquire_at(t0).is_ok());
        assert!(limiter.try_acquire_at(t0).is_err());

        // New hour, fresh budget
        assert!(limiter.try_acquire_at(t1).is_ok());
    }

    #[test]
    fn test_monitor_slots_cap_and_release() {
        let slots = MonitorSlots::new(2);
        assert!(slots.try_acquire());
        assert!(slots.try_acquire());
        assert!(!slots.try_acquire());
        assert_eq!(slots.active(), 2);

        slots.release();
        assert!(slots.try_acquire());
    }
}
