//! Wall-clock access behind a seam, so engine and janitor logic can be
//! driven by a fixed instant in tests instead of sleeping on real time.

use chrono::{Duration, NaiveDateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Production clock: system UTC wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Apply a configured hour offset to a raw device timestamp.
///
/// `ATTENDANCE_TZ_OFFSET` is validated at config-load time; by the time it
/// reaches here it is always a plain integer hour count.
pub fn apply_offset(dt: NaiveDateTime, hours: i64) -> NaiveDateTime {
    if hours == 0 {
        dt
    } else {
        dt + Duration::hours(hours)
    }
}

/// Test-only clock double, kept out of `cfg(test)` so integration tests
/// under `tests/` (compiled as a separate crate) can use it too.
#[doc(hidden)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// A clock fixed to a single instant, advanceable by tests.
    pub struct FixedClock(Mutex<NaiveDateTime>);

    impl FixedClock {
        pub fn new(at: NaiveDateTime) -> Self {
            Self(Mutex::new(at))
        }

        pub fn set(&self, at: NaiveDateTime) {
            *self.0.lock().expect("lock poisoned") = at;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().expect("lock poisoned")
        }
    }
}
