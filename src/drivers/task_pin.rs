//! Core-pinned thread spawning for the ESP32 dual-core.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::spawn` creates a
//! FreeRTOS task pinned to a specific CPU core with explicit priority
//! and stack size. On non-ESP targets, falls back to plain thread spawn.
//!
//! # ESP-IDF Threading Model
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` call from
//! the calling thread, so the config→spawn pair must not be interleaved
//! with other thread creation on the same thread.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// CPU core identifiers for the ESP32 Xtensa dual-core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU) — WiFi / lwIP, notification worker.
    Pro = 0,
    /// Core 1 (APP_CPU) — sensor supervision and IRQ handling.
    App = 1,
}

/// Spawn a thread pinned to a specific core with explicit priority and stack.
///
/// The `name` parameter must be a null-terminated string (e.g. `"irq\0"`).
#[cfg(target_os = "espidf")]
pub fn spawn_on_core<T: Send + 'static>(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<JoinHandle<T>> {
    let display_name = name.trim_end_matches('\0');

    // SAFETY: `cfg` outlives the call and `name` is 'static and
    // null-terminated; the config only applies to this thread's next spawn.
    let ret = unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = priority as i32;
        cfg.stack_size = (stack_kb * 1024) as i32;
        cfg.thread_name = name.as_ptr() as *const _;
        esp_idf_sys::esp_pthread_set_cfg(&cfg)
    };
    if ret != esp_idf_sys::ESP_OK as i32 {
        log::error!("task_pin: esp_pthread_set_cfg failed for '{}' (rc={})", display_name, ret);
        return Err(Error::Spawn(display_name));
    }

    log::debug!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .map_err(|_| Error::Spawn(display_name))
}

/// Simulation fallback — ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_on_core<T: Send + 'static>(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() -> T + Send + 'static,
) -> Result<JoinHandle<T>> {
    let display_name = name.trim_end_matches('\0');
    log::debug!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        display_name,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb.max(64) * 1024)
        .spawn(f)
        .map_err(|_| Error::Spawn(display_name))
}

/// Join `handle` if it finishes within `timeout`.
///
/// On timeout the handle is handed back so the caller can keep tracking
/// the thread instead of detaching it.
pub fn join_within<T>(
    handle: JoinHandle<T>,
    timeout: Duration,
) -> core::result::Result<std::thread::Result<T>, JoinHandle<T>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(handle.join())
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn spawned_thread_carries_display_name() {
        let handle = spawn_on_core(Core::App, 5, 4, "sampler\0", || {
            assert_eq!(std::thread::current().name(), Some("sampler"));
        })
        .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn join_within_returns_the_value() {
        let handle = spawn_on_core(Core::Pro, 5, 4, "quick\0", || 7u32).unwrap();
        let joined = join_within(handle, Duration::from_secs(2));
        assert!(matches!(joined, Ok(Ok(7))));
    }

    #[test]
    fn join_within_hands_back_a_slow_thread() {
        let handle = spawn_on_core(Core::Pro, 5, 4, "slow\0", || {
            std::thread::sleep(Duration::from_millis(200));
        })
        .unwrap();
        let Err(handle) = join_within(handle, Duration::from_millis(20)) else {
            panic!("thread should still be running");
        };
        assert!(!handle.is_finished());
        handle.join().unwrap();
    }
}
