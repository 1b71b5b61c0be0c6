//! Request pacing and the scheduler's notion of "today".

use chrono::NaiveDate;
use rand::Rng;
use std::time::Duration;

/// Rate-limiting strategy applied before every provider call.
pub trait Pacer: Send + Sync {
    fn pause(&self);
}

/// Sleep a fixed interval before each call (default 500 ms).
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl Default for FixedDelay {
    fn default() -> Self {
        Self(Duration::from_millis(500))
    }
}

impl Pacer for FixedDelay {
    fn pause(&self) {
        std::thread::sleep(self.0);
    }
}

/// `base` plus a uniform random extra in `[0, jitter]`.
#[derive(Debug, Clone, Copy)]
pub struct JitteredDelay {
    pub base: Duration,
    pub jitter: Duration,
}

impl JitteredDelay {
    pub fn next_delay(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        let extra = if max == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max)
        };
        self.base + Duration::from_millis(extra)
    }
}

impl Pacer for JitteredDelay {
    fn pause(&self) {
        std::thread::sleep(self.next_delay());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

impl Pacer for NoDelay {
    fn pause(&self) {}
}

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local calendar date of the machine running the ingest.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
