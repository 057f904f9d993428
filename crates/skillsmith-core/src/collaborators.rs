//! Injectable clock and random-source traits (spec §6 external collaborators).
//!
//! Every age/decay calculation and every generated id or jitter value goes
//! through one of these so tests can be deterministic.

use chrono::{DateTime, Utc};

/// Source of the current time. Production code uses [`SystemClock`]; tests
/// can substitute a fixed or steppable clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of randomness for unique ids and jitter. Production code uses
/// [`SystemRandom`]; tests can substitute a seeded or scripted source.
pub trait Random: Send + Sync {
    fn uuid(&self) -> uuid::Uuid;
    /// Uniform float in `[0, 1)`.
    fn unit_f64(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRandom;

impl Random for SystemRandom {
    fn uuid(&self) -> uuid::Uuid {
        uuid::Uuid::new_v4()
    }

    fn unit_f64(&self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen::<f64>()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that starts at a fixed instant and only advances when told to.
    pub struct FixedClock {
        millis: AtomicI64,
    }

    impl FixedClock {
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        pub fn advance(&self, duration: chrono::Duration) {
            self.millis.fetch_add(duration.num_milliseconds(), Ordering::SeqCst);
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap()
        }
    }

    /// Random source returning deterministic, incrementing uuids and a fixed
    /// unit value, for assertions that must not depend on entropy.
    pub struct ScriptedRandom {
        counter: AtomicI64,
        unit: f64,
    }

    impl ScriptedRandom {
        pub fn new(unit: f64) -> Self {
            Self {
                counter: AtomicI64::new(0),
                unit,
            }
        }
    }

    impl Random for ScriptedRandom {
        fn uuid(&self) -> uuid::Uuid {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) as u128;
            uuid::Uuid::from_u128(n)
        }

        fn unit_f64(&self) -> f64 {
            self.unit
        }
    }
}
