//! Clock adapters.
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()` (microsecond
//!   precision, monotonic) and `gettimeofday()` for wall-clock time.
//! - **`not(target_os = "espidf")`** — uses `std::time` for host-side
//!   testing, plus [`ManualClock`] for deterministic timer tests.

use std::time::Duration;

use crate::app::ports::Clock;

/// Wall-clock values before 2020-01-01 mean SNTP has not synced yet.
const EPOCH_2020: u64 = 1_577_836_800;

/// Process-wide monotonic time since boot.
#[cfg(target_os = "espidf")]
pub fn platform_now() -> Duration {
    // SAFETY: esp_timer_get_time reads the RTC high-resolution counter.
    let us = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    Duration::from_micros(us as u64)
}

/// Process-wide monotonic time since first use.
#[cfg(not(target_os = "espidf"))]
pub fn platform_now() -> Duration {
    use std::time::Instant;
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed()
}

/// Production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn uptime(&self) -> Duration {
        platform_now()
    }

    #[cfg(target_os = "espidf")]
    fn unix_secs(&self) -> Option<u64> {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: `tv` is a valid out-pointer; the timezone argument may be null.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return None;
        }
        let secs = u64::try_from(tv.tv_sec).ok()?;
        (secs >= EPOCH_2020).then_some(secs)
    }

    #[cfg(not(target_os = "espidf"))]
    fn unix_secs(&self) -> Option<u64> {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_secs();
        (secs >= EPOCH_2020).then_some(secs)
    }
}

/// Test clock: time only moves when told to.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<Duration>,
}

#[cfg(not(target_os = "espidf"))]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, at: Duration) {
        *self.now.lock() = at;
    }
}

#[cfg(not(target_os = "espidf"))]
impl Clock for ManualClock {
    fn uptime(&self) -> Duration {
        *self.now.lock()
    }

    fn unix_secs(&self) -> Option<u64> {
        None
    }
}
