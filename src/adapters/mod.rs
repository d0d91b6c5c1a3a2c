//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements         | Connects to                   |
//! |-------------|--------------------|-------------------------------|
//! | `log_sink`  | NotificationSink   | Serial log output             |
//! | `spi_bus`   | BusFactory         | ESP32 SPI2 / simulated chip   |
//! | `time`      | Clock              | ESP32 system timer, SNTP time |
//! | `webhook`   | NotificationSink   | HTTP(S) webhook endpoint      |
//! | `wifi`      | (bring-up only)    | ESP-IDF WiFi STA              |

pub mod log_sink;
pub mod spi_bus;
pub mod time;
pub mod webhook;
pub mod wifi;
