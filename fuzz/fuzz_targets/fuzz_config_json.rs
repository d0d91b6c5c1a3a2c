//! Fuzz target: `MonitorConfig::from_json`
//!
//! Arbitrary bytes must either be rejected with an error or yield a config
//! that passes validation again.
//!
//! cargo fuzz run fuzz_config_json

#![no_main]

use libfuzzer_sys::fuzz_target;
use strikeguard::MonitorConfig;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = MonitorConfig::from_json(text) {
        assert!(config.validate().is_ok(), "accepted config must validate");
        assert!(config.alerts.warning_distance_km > config.alerts.critical_distance_km);
        assert!(config.noise.raised_noise_floor_level <= 7);
    }
});
