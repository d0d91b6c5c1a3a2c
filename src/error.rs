//! Unified error types for the StrikeGuard firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the
//! supervisor loop handles failures uniformly.  All variants are `Copy`
//! so they can be stored in the shared status record and passed across
//! threads without allocation.

use core::fmt;

use embedded_hal::spi::ErrorKind;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The AS3935 could not be read, written or verified.
    Sensor(SensorError),
    /// A power-up / calibration attempt failed.
    Init(InitError),
    /// Configuration is invalid, or a command is not allowed by it.
    Config(&'static str),
    /// The outbound notification transport failed.
    Notify(NotifyError),
    /// A worker thread could not be created.
    Spawn(&'static str),
    /// A previous run has not finished winding down.
    Busy(&'static str),
    /// The global stop signal was raised while waiting.
    Stopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Init(e) => write!(f, "init: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Notify(e) => write!(f, "notify: {e}"),
            Self::Spawn(name) => write!(f, "spawn: could not start '{name}'"),
            Self::Busy(what) => write!(f, "busy: {what}"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// A register transaction kept failing after all retry attempts.
    HardwareFault { register: u8, kind: ErrorKind },
    /// The driver has been cleaned up; the bus handle is gone.
    BusClosed,
    /// Noise-floor level outside 0..=7.
    InvalidNoiseFloor(u8),
    /// Health check: the PWD bit is set.
    PoweredDown,
    /// Health check: the scratch register did not echo the test pattern.
    ScratchMismatch { wrote: u8, read: u8 },
    /// Health check: two consecutive reads of a status register differ.
    UnstableReadback { register: u8 },
    /// The sensor-access lock could not be taken in time.
    LockTimeout,
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareFault { register, kind } => {
                write!(f, "bus fault on register 0x{register:02X} ({kind})")
            }
            Self::BusClosed => write!(f, "bus closed"),
            Self::InvalidNoiseFloor(level) => write!(f, "noise floor {level} outside 0..=7"),
            Self::PoweredDown => write!(f, "chip reports powered down"),
            Self::ScratchMismatch { wrote, read } => {
                write!(f, "scratch mismatch (wrote 0x{wrote:02X}, read 0x{read:02X})")
            }
            Self::UnstableReadback { register } => {
                write!(f, "unstable readback on register 0x{register:02X}")
            }
            Self::LockTimeout => write!(f, "sensor lock timeout"),
        }
    }
}

impl From<SensorError> for Error {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Initialisation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The chip did not echo the calibration pattern after power-up.
    CalibrationMismatch { expected: u8, found: u8 },
    /// The responsiveness probe read back an unexpected value.
    ProbeFailed { expected: u8, found: u8 },
    /// Every initialisation attempt failed.
    RetriesExhausted(u32),
    /// The bus factory could not open the SPI device.
    BusUnavailable,
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CalibrationMismatch { expected, found } => write!(
                f,
                "calibration echo mismatch (expected 0x{expected:02X}, found 0x{found:02X})"
            ),
            Self::ProbeFailed { expected, found } => write!(
                f,
                "probe mismatch (expected 0x{expected:02X}, found 0x{found:02X})"
            ),
            Self::RetriesExhausted(n) => write!(f, "gave up after {n} attempts"),
            Self::BusUnavailable => write!(f, "SPI bus unavailable"),
        }
    }
}

impl From<InitError> for Error {
    fn from(e: InitError) -> Self {
        Self::Init(e)
    }
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The transport could not reach the remote endpoint.
    Transport(&'static str),
    /// The remote endpoint answered with a non-success status.
    Rejected(u16),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Rejected(status) => write!(f, "rejected with status {status}"),
        }
    }
}

impl From<NotifyError> for Error {
    fn from(e: NotifyError) -> Self {
        Self::Notify(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
