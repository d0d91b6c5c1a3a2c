//! WiFi station bring-up for the webhook transport.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`connect_station`] drives `esp_idf_svc::wifi`.
//! - **all other targets**: only credential validation is compiled, for tests.
//!
//! ## Retry policy
//!
//! Connection attempts back off exponentially (2 s → 4 s → 8 s … capped at
//! 60 s) up to [`MAX_CONNECT_ATTEMPTS`].

use core::fmt;

pub const MAX_CONNECT_ATTEMPTS: u32 = 6;
const MAX_BACKOFF_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    ConnectionFailed,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)"),
            Self::ConnectionFailed => write!(f, "WiFi connection failed"),
        }
    }
}

impl std::error::Error for ConnectivityError {}

// ───────────────────────────────────────────────────────────────
// Credentials
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Validated station credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: heapless::String<32>,
    password: heapless::String<64>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConnectivityError> {
        if ssid.is_empty() {
            return Err(ConnectivityError::NoCredentials);
        }
        if !is_printable_ascii(ssid) {
            return Err(ConnectivityError::InvalidSsid);
        }
        if !password.is_empty() && password.len() < 8 {
            return Err(ConnectivityError::InvalidPassword);
        }
        let mut s = heapless::String::new();
        s.push_str(ssid).map_err(|()| ConnectivityError::InvalidSsid)?;
        let mut p = heapless::String::new();
        p.push_str(password)
            .map_err(|()| ConnectivityError::InvalidPassword)?;
        Ok(Self { ssid: s, password: p })
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

/// Delay before connection attempt `attempt + 1` (1-based `attempt`).
pub fn backoff_for(attempt: u32) -> std::time::Duration {
    let secs = 2u64.saturating_mul(1 << attempt.saturating_sub(1).min(16));
    std::time::Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF station
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::connect_station;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::{error, info, warn};

    use super::{ConnectivityError, MAX_CONNECT_ATTEMPTS, WifiCredentials, backoff_for};

    /// Start the station and block until the netif is up.
    pub fn connect_station(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        creds: &WifiCredentials,
    ) -> Result<BlockingWifi<EspWifi<'static>>, ConnectivityError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs).map_err(|e| {
            error!("WiFi: driver init failed: {:?}", e);
            ConnectivityError::ConnectionFailed
        })?;
        let mut wifi = BlockingWifi::wrap(esp_wifi, sysloop).map_err(|_| ConnectivityError::ConnectionFailed)?;

        let auth_method = if creds.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: creds.ssid.clone(),
            password: creds.password.clone(),
            auth_method,
            ..Default::default()
        }))
        .map_err(|_| ConnectivityError::ConnectionFailed)?;
        wifi.start().map_err(|_| ConnectivityError::ConnectionFailed)?;

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            info!("WiFi: connecting to '{}' (attempt {})", creds.ssid(), attempt);
            match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                Ok(()) => {
                    info!("WiFi: connected");
                    return Ok(wifi);
                }
                Err(e) => {
                    warn!("WiFi: attempt {} failed: {:?}", attempt, e);
                    std::thread::sleep(backoff_for(attempt));
                }
            }
        }
        error!("WiFi: giving up after {} attempts", MAX_CONNECT_ATTEMPTS);
        Err(ConnectivityError::ConnectionFailed)
    }
}
