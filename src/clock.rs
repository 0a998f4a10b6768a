use std::sync::Mutex;

use chrono::Utc;
use ulid::Ulid;

use crate::model::Day;

/// Source of "today". Read once per workflow call.
pub trait Clock: Send + Sync {
    fn today(&self) -> Day;
}

/// Source of fresh rental, property and user ids.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Ulid;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Day {
        Utc::now().date_naive()
    }
}

/// Clock pinned to a settable day.
#[derive(Debug)]
pub struct FixedClock {
    today: Mutex<Day>,
}

impl FixedClock {
    pub fn new(today: Day) -> Self {
        Self {
            today: Mutex::new(today),
        }
    }

    pub fn set(&self, today: Day) {
        *self.today.lock().unwrap_or_else(|e| e.into_inner()) = today;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> Day {
        *self.today.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UlidGenerator;

impl IdGenerator for UlidGenerator {
    fn generate(&self) -> Ulid {
        Ulid::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn fixed_clock_moves_only_when_set() {
        let jan1 = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let jan9 = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        let clock = FixedClock::new(jan1);
        assert_eq!(clock.today(), jan1);
        assert_eq!(clock.today(), jan1);
        clock.set(jan9);
        assert_eq!(clock.today(), jan9);
    }

    #[test]
    fn ulid_generator_is_unique() {
        let ids = UlidGenerator;
        assert_ne!(ids.generate(), ids.generate());
    }
}
