//! AS3935 Franklin lightning sensor driver (SPI mode 1).
//!
//! ```text
//!  write:  [0b00aa_aaaa, data]        read:  [0b01aa_aaaa, 0x00]
//!                                             └──────── value ◀─ byte 1
//! ```
//!
//! Every register transaction is retried up to [`BusTiming::attempts`]
//! times before surfacing [`SensorError::HardwareFault`].  The driver owns
//! the bus handle and the IRQ line; [`As3935::cleanup`] gives both back and
//! is safe to call any number of times.
//!
//! The driver itself is not thread-safe.  Callers share it through the
//! sensor-lifecycle lock ([`SensorSlot`]).

pub mod registers;
#[cfg(not(target_os = "espidf"))]
pub mod sim;

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::spi::{Error as _, ErrorKind, SpiDevice};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::app::ports::InterruptLine;
use crate::config::{SensorConfig, Sensitivity};
use crate::error::{Error, InitError, Result, SensorError};
use crate::events::{Distance, InterruptReason};

use registers::*;

/// The sensor-lifecycle lock: at most one live driver, guarded so that
/// initialisation, register I/O and teardown never interleave.
pub type SensorSlot<S> = Arc<Mutex<Option<As3935<S>>>>;

/// Retry policy for single register transactions.
#[derive(Debug, Clone, Copy)]
pub struct BusTiming {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for BusTiming {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_millis(5),
        }
    }
}

/// Inputs to the power-up sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub indoor: bool,
    pub sensitivity: Sensitivity,
}

impl From<&SensorConfig> for SensorSettings {
    fn from(c: &SensorConfig) -> Self {
        Self {
            indoor: c.indoor,
            sensitivity: c.sensitivity,
        }
    }
}

/// Lifecycle and health of the live driver instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorState {
    pub initialized: bool,
    pub healthy: bool,
    pub last_error: Option<Error>,
    /// NF_LEV chosen at power-up; restored when noise mode reverts.
    pub original_noise_floor: u8,
}

pub struct As3935<S> {
    spi: Option<S>,
    irq: Arc<dyn InterruptLine>,
    settings: SensorSettings,
    timing: BusTiming,
    state: SensorState,
}

impl<S: SpiDevice> As3935<S> {
    pub fn new(spi: S, irq: Arc<dyn InterruptLine>, settings: SensorSettings) -> Self {
        Self::with_timing(spi, irq, settings, BusTiming::default())
    }

    pub fn with_timing(
        spi: S,
        irq: Arc<dyn InterruptLine>,
        settings: SensorSettings,
        timing: BusTiming,
    ) -> Self {
        Self {
            spi: Some(spi),
            irq,
            settings,
            timing,
            state: SensorState::default(),
        }
    }

    pub fn state(&self) -> SensorState {
        self.state
    }

    pub fn settings(&self) -> SensorSettings {
        self.settings
    }

    pub fn irq(&self) -> &Arc<dyn InterruptLine> {
        &self.irq
    }

    pub fn original_noise_floor(&self) -> u8 {
        self.state.original_noise_floor
    }

    // ── Register I/O ──────────────────────────────────────────

    pub fn read(&mut self, reg: u8) -> Result<u8> {
        let reg = reg & ADDR_MASK;
        let timing = self.timing;
        let spi = self.spi.as_mut().ok_or(SensorError::BusClosed)?;

        let mut last = ErrorKind::Other;
        for attempt in 1..=timing.attempts {
            let mut buf = [reg | READ_FLAG, 0x00];
            match spi.transfer_in_place(&mut buf) {
                Ok(()) => return Ok(buf[1]),
                Err(e) => {
                    last = e.kind();
                    debug!("as3935: read 0x{:02X} attempt {} failed ({:?})", reg, attempt, last);
                    if attempt < timing.attempts {
                        std::thread::sleep(timing.retry_delay);
                    }
                }
            }
        }
        Err(SensorError::HardwareFault { register: reg, kind: last }.into())
    }

    pub fn write(&mut self, reg: u8, value: u8) -> Result<()> {
        let reg = reg & ADDR_MASK;
        let timing = self.timing;
        let spi = self.spi.as_mut().ok_or(SensorError::BusClosed)?;

        let mut last = ErrorKind::Other;
        for attempt in 1..=timing.attempts {
            match spi.write(&[reg, value]) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last = e.kind();
                    debug!("as3935: write 0x{:02X} attempt {} failed ({:?})", reg, attempt, last);
                    if attempt < timing.attempts {
                        std::thread::sleep(timing.retry_delay);
                    }
                }
            }
        }
        Err(SensorError::HardwareFault { register: reg, kind: last }.into())
    }

    // ── Power-up and calibration ──────────────────────────────

    /// Run the datasheet power-up sequence and apply the sensitivity tier.
    pub fn power_up(&mut self) -> Result<()> {
        self.state.initialized = false;

        self.write(REG_AFE_GAIN, POWER_ON)?;
        std::thread::sleep(Duration::from_millis(3));

        self.write(REG_INT, CALIBRATION_PATTERN)?;
        let echo = self.read(REG_INT)? & CALIBRATION_ECHO_MASK;
        let expected = CALIBRATION_PATTERN & CALIBRATION_ECHO_MASK;
        if echo != expected {
            return Err(InitError::CalibrationMismatch {
                expected,
                found: echo,
            }
            .into());
        }

        self.write(REG_DISP_LCO, DISP_LCO_ON)?;
        std::thread::sleep(Duration::from_millis(2));
        self.write(REG_DISP_LCO, DISP_LCO_OFF)?;
        std::thread::sleep(Duration::from_millis(2));

        self.write(REG_AFE_GAIN, afe_gain(self.settings.indoor))?;

        let tier = Tier::for_sensitivity(self.settings.sensitivity);
        self.write(REG_NOISE_WDTH, tier.noise_wdth_register())?;
        let srej = self.read(REG_SREJ)?;
        self.write(
            REG_SREJ,
            (srej & 0x0F) | (tier.spike_rejection << SREJ_SHIFT),
        )?;

        self.state = SensorState {
            initialized: true,
            healthy: true,
            last_error: None,
            original_noise_floor: tier.noise_floor,
        };
        info!(
            "as3935: powered up ({}, {:?}: nf={} wdth={} srej={})",
            if self.settings.indoor { "indoor" } else { "outdoor" },
            self.settings.sensitivity,
            tier.noise_floor,
            tier.watchdog_width,
            tier.spike_rejection
        );
        Ok(())
    }

    /// Responsiveness probe: WDTH must read back as configured.
    pub fn probe(&mut self) -> Result<()> {
        let expected = Tier::for_sensitivity(self.settings.sensitivity).watchdog_width;
        let found = self.read(REG_NOISE_WDTH)? & WDTH_MASK;
        if found != expected {
            return Err(InitError::ProbeFailed { expected, found }.into());
        }
        Ok(())
    }

    // ── Noise floor ───────────────────────────────────────────

    /// Set NF_LEV (0–7), preserving WDTH.  Out-of-range input touches nothing.
    pub fn set_noise_floor(&mut self, level: u8) -> Result<()> {
        if level > NOISE_FLOOR_MAX {
            return Err(SensorError::InvalidNoiseFloor(level).into());
        }
        let current = self.read(REG_NOISE_WDTH)?;
        let updated = (current & !NOISE_FLOOR_MASK) | (level << NOISE_FLOOR_SHIFT);
        self.write(REG_NOISE_WDTH, updated)?;
        debug!("as3935: noise floor -> {}", level);
        Ok(())
    }

    pub fn noise_floor(&mut self) -> Result<u8> {
        Ok((self.read(REG_NOISE_WDTH)? & NOISE_FLOOR_MASK) >> NOISE_FLOOR_SHIFT)
    }

    // ── Decoded accessors ─────────────────────────────────────

    pub fn interrupt_reason(&mut self) -> Result<InterruptReason> {
        Ok(InterruptReason::from_register(self.read(REG_INT)?))
    }

    pub fn lightning_distance(&mut self) -> Result<Distance> {
        Ok(Distance::from_register(self.read(REG_DISTANCE)?))
    }

    pub fn lightning_energy(&mut self) -> Result<u32> {
        let lsb = self.read(REG_ENERGY_L)?;
        let msb = self.read(REG_ENERGY_M)?;
        let mmsb = self.read(REG_ENERGY_MM)?;
        Ok(decode_energy(lsb, msb, mmsb))
    }

    // ── Health ────────────────────────────────────────────────

    /// Powered-down check, scratch round-trip, then a confirmatory
    /// double read of the two status registers.
    pub fn health_check(&mut self) -> Result<()> {
        let result = self.run_health_check();
        match result {
            Ok(()) => self.state.healthy = true,
            Err(e) => self.mark_degraded(e),
        }
        result
    }

    fn run_health_check(&mut self) -> Result<()> {
        if self.read(REG_AFE_GAIN)? & PWD_BIT != 0 {
            return Err(SensorError::PoweredDown.into());
        }

        self.write(REG_SCRATCH, SCRATCH_PATTERN)?;
        let read = self.read(REG_SCRATCH)?;
        if read != SCRATCH_PATTERN {
            return Err(SensorError::ScratchMismatch {
                wrote: SCRATCH_PATTERN,
                read,
            }
            .into());
        }

        for register in [REG_AFE_GAIN, REG_NOISE_WDTH] {
            let first = self.read(register)?;
            let second = self.read(register)?;
            if first != second {
                return Err(SensorError::UnstableReadback { register }.into());
            }
        }
        Ok(())
    }

    pub fn mark_degraded(&mut self, err: Error) {
        if self.state.healthy {
            warn!("as3935: degraded: {}", err);
        }
        self.state.healthy = false;
        self.state.last_error = Some(err);
    }

    // ── Teardown ──────────────────────────────────────────────

    pub fn is_open(&self) -> bool {
        self.spi.is_some()
    }

    /// Release the bus handle and return the IRQ pin to a plain input.
    pub fn cleanup(&mut self) {
        if self.spi.take().is_none() {
            return;
        }
        self.irq.release();
        self.state.initialized = false;
        self.state.healthy = false;
        info!("as3935: released bus and IRQ pin {}", self.irq.pin());
    }
}

impl<S> Drop for As3935<S> {
    fn drop(&mut self) {
        if self.spi.take().is_some() {
            self.irq.release();
        }
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::sim::SimAs3935;
    use super::*;
    use crate::drivers::irq::SimIrqLine;

    fn driver(sensitivity: Sensitivity, indoor: bool) -> (As3935<SimAs3935>, SimAs3935) {
        let chip = SimAs3935::new();
        let irq = Arc::new(SimIrqLine::new(9));
        let drv = As3935::new(chip.clone(), irq, SensorSettings { indoor, sensitivity });
        (drv, chip)
    }

    #[test]
    fn power_up_writes_tier_registers() {
        let (mut drv, chip) = driver(Sensitivity::Low, true);
        drv.power_up().unwrap();

        assert_eq!(chip.register(REG_AFE_GAIN), AFE_INDOOR);
        assert_eq!(chip.register(REG_NOISE_WDTH), 0x43);
        assert_eq!(chip.register(REG_SREJ) >> 4, 3);
        assert_eq!(chip.register(REG_SREJ) & 0x0F, 0x02, "low nibble preserved");
        assert_eq!(chip.register(REG_DISP_LCO), DISP_LCO_OFF);

        let s = drv.state();
        assert!(s.initialized && s.healthy);
        assert_eq!(s.original_noise_floor, 4);
    }

    #[test]
    fn power_up_toggles_lco_display() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        drv.power_up().unwrap();
        let lco: Vec<u8> = chip
            .write_log()
            .into_iter()
            .filter(|(reg, _)| *reg == REG_DISP_LCO)
            .map(|(_, v)| v)
            .collect();
        assert_eq!(lco, vec![DISP_LCO_ON, DISP_LCO_OFF]);
        assert_eq!(chip.register(REG_AFE_GAIN), AFE_OUTDOOR);
    }

    #[test]
    fn calibration_mismatch_is_init_error() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        chip.set_calibration_fault(true);
        let err = drv.power_up().unwrap_err();
        assert!(matches!(err, Error::Init(InitError::CalibrationMismatch { .. })));
        assert!(!drv.state().initialized);
    }

    #[test]
    fn transient_fault_is_retried() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        chip.set_register(REG_DISTANCE, 12);
        chip.fail_next(2);
        assert_eq!(drv.lightning_distance().unwrap(), Distance::Km(12));
    }

    #[test]
    fn persistent_fault_surfaces_after_three_attempts() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        let before = chip.transactions();
        chip.fail_next(3);
        let err = drv.read(REG_DISTANCE).unwrap_err();
        assert!(matches!(
            err,
            Error::Sensor(SensorError::HardwareFault { register: 0x07, .. })
        ));
        assert_eq!(chip.transactions() - before, 3);
    }

    #[test]
    fn noise_floor_preserves_wdth() {
        let (mut drv, chip) = driver(Sensitivity::High, false);
        drv.power_up().unwrap();
        drv.set_noise_floor(6).unwrap();
        assert_eq!(chip.register(REG_NOISE_WDTH), 0x61);
        assert_eq!(drv.noise_floor().unwrap(), 6);
    }

    #[test]
    fn noise_floor_rejects_out_of_range_without_touching_bus() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        drv.power_up().unwrap();
        let before = chip.transactions();
        assert_eq!(
            drv.set_noise_floor(8),
            Err(Error::Sensor(SensorError::InvalidNoiseFloor(8)))
        );
        assert_eq!(chip.transactions(), before);
        assert_eq!(chip.register(REG_NOISE_WDTH), 0x22);
    }

    #[test]
    fn decodes_interrupt_and_strike() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        chip.set_lightning(8, 250_000);
        assert_eq!(drv.interrupt_reason().unwrap(), InterruptReason::Lightning);
        assert_eq!(drv.lightning_distance().unwrap(), Distance::Km(8));
        assert_eq!(drv.lightning_energy().unwrap(), 250_000);
    }

    #[test]
    fn probe_checks_watchdog_width() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        drv.power_up().unwrap();
        assert!(drv.probe().is_ok());
        chip.set_register(REG_NOISE_WDTH, 0x2F);
        assert!(matches!(
            drv.probe(),
            Err(Error::Init(InitError::ProbeFailed { expected: 2, found: 0x0F }))
        ));
    }

    #[test]
    fn health_check_detects_power_down_and_scratch_faults() {
        let (mut drv, chip) = driver(Sensitivity::Medium, false);
        drv.power_up().unwrap();
        assert!(drv.health_check().is_ok());

        chip.set_scratch_stuck(true);
        assert_eq!(
            drv.health_check(),
            Err(Error::Sensor(SensorError::ScratchMismatch { wrote: 0xA5, read: 0x00 }))
        );
        assert!(!drv.state().healthy);
        chip.set_scratch_stuck(false);

        chip.set_register(REG_AFE_GAIN, AFE_OUTDOOR | PWD_BIT);
        assert_eq!(
            drv.health_check(),
            Err(Error::Sensor(SensorError::PoweredDown))
        );
    }

    #[test]
    fn cleanup_is_idempotent_and_releases_irq() {
        let chip = SimAs3935::new();
        let irq = Arc::new(SimIrqLine::new(9));
        let line: Arc<dyn InterruptLine> = irq.clone();
        let mut drv = As3935::new(
            chip,
            line,
            SensorSettings {
                indoor: false,
                sensitivity: Sensitivity::Medium,
            },
        );
        drv.power_up().unwrap();
        drv.cleanup();
        drv.cleanup();
        assert_eq!(irq.release_count(), 1);
        assert!(!drv.is_open());
        assert_eq!(drv.read(0x00), Err(Error::Sensor(SensorError::BusClosed)));
        drop(drv);
        assert_eq!(irq.release_count(), 1);
    }
}
