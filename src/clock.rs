use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, RwLock};

/// Time source for due-window decisions, injectable so schedule logic can be
/// exercised against fixed instants.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually controlled clock for tests. Cloning shares the instant, so a
/// clone handed to the scheduler observes later `set`/`advance` calls.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self {
            instant: Arc::new(RwLock::new(instant)),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.instant.write().expect("clock lock poisoned") = instant;
    }

    pub fn advance(&self, delta: Duration) {
        let mut instant = self.instant.write().expect("clock lock poisoned");
        *instant += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.instant.read().expect("clock lock poisoned")
    }
}
