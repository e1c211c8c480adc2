use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, SeedableRng, rngs::StdRng};

/// UTC time source. Injected everywhere a timestamp is taken so expiry and
/// rate-limit comparisons stay consistent and testable.
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

/// A clock that only moves when told to. Lets tests age verification records
/// past their rate-limit interval or expiry without sleeping.
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(Mutex::new(start))
    }

    /// # Panics
    /// Panics if another thread panicked while holding the clock.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.0.lock().unwrap();
        *now += Duration::seconds(secs);
    }

    /// # Panics
    /// Panics if another thread panicked while holding the clock.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.0.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub(crate) const TOKEN_BYTES: usize = 16;

/// 16 cryptographically random bytes as a fixed 32-char lowercase hex string.
#[must_use]
pub fn random_token() -> String {
    let mut rng = StdRng::from_os_rng();

    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill_bytes(&mut bytes);

    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
