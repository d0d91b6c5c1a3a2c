//! GPIO / peripheral pin assignments for the StrikeGuard sensor board.
//!
//! Single source of truth: the configuration defaults and the ESP-IDF
//! adapters reference this module rather than hard-coding pin numbers.

// ---------------------------------------------------------------------------
// AS3935 lightning sensor (SPI mode 1)
// ---------------------------------------------------------------------------

/// SPI host peripheral (SPI2 / FSPI).
pub const SPI_HOST: u8 = 2;
pub const SPI_SCLK_GPIO: u8 = 12;
pub const SPI_MOSI_GPIO: u8 = 11;
pub const SPI_MISO_GPIO: u8 = 13;
/// Chip select, active LOW.
pub const AS3935_CS_GPIO: u8 = 10;
/// IRQ output of the sensor: active HIGH pulse on the chip, inverted by
/// the board level shifter so the MCU sees a falling edge.
pub const AS3935_IRQ_GPIO: u8 = 9;

// ---------------------------------------------------------------------------
// Timing constraints from the datasheet
// ---------------------------------------------------------------------------

/// Minimum spacing between accepted IRQ edges (software debounce, ms).
pub const IRQ_DEBOUNCE_MS: u64 = 20;
/// Wait after the IRQ edge before INT register is valid (ms).
pub const IRQ_SETTLE_MS: u64 = 2;
