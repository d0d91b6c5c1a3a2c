//! Host-side AS3935 register-file emulator.
//!
//! Implements [`SpiDevice`] over a 64-byte register file with the chip's
//! command framing, so the real driver code runs unchanged in tests.
//! Clones share the same chip, letting a test keep a handle for fault
//! injection while the driver owns another.

use std::sync::Arc;

use embedded_hal::spi::{self, ErrorKind, ErrorType, Operation, SpiDevice};
use parking_lot::Mutex;

use super::registers::{ADDR_MASK, READ_FLAG, REG_INT, REG_SCRATCH};

/// What a stuck scratch register reads back, whatever was written.
const SCRATCH_STUCK_VALUE: u8 = 0x00;

/// Injected bus failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBusError;

impl spi::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

#[derive(Debug)]
struct ChipState {
    regs: [u8; 64],
    fail_next: u32,
    unresponsive: bool,
    calibration_fault: bool,
    scratch_stuck: bool,
    transactions: u64,
    write_log: Vec<(u8, u8)>,
}

impl ChipState {
    fn new() -> Self {
        let mut regs = [0u8; 64];
        // Datasheet power-on defaults.
        regs[0x00] = 0x24;
        regs[0x01] = 0x22;
        regs[0x02] = 0xC2;
        regs[0x07] = 0x3F;
        Self {
            regs,
            fail_next: 0,
            unresponsive: false,
            calibration_fault: false,
            scratch_stuck: false,
            transactions: 0,
            write_log: Vec::new(),
        }
    }

    fn write(&mut self, reg: u8, value: u8) {
        let reg = reg & ADDR_MASK;
        self.write_log.push((reg, value));
        match reg {
            REG_INT => {
                let upper = if self.calibration_fault { 0x00 } else { value & 0xF0 };
                self.regs[REG_INT as usize] = upper | (self.regs[REG_INT as usize] & 0x0F);
            }
            _ => self.regs[reg as usize] = value,
        }
    }

    fn read(&self, reg: u8) -> u8 {
        let reg = reg & ADDR_MASK;
        if reg == REG_SCRATCH && self.scratch_stuck {
            return SCRATCH_STUCK_VALUE;
        }
        self.regs[reg as usize]
    }

    /// Apply one command frame (`tx[0]` = command byte) and fill `rx`.
    fn frame(&mut self, tx: &[u8], rx: &mut [u8]) {
        let Some(&cmd) = tx.first() else { return };
        let reg = cmd & ADDR_MASK;
        if cmd & READ_FLAG != 0 {
            for (i, slot) in rx.iter_mut().enumerate().skip(1) {
                *slot = self.read(reg.wrapping_add(i as u8 - 1));
            }
        } else if let Some(&value) = tx.get(1) {
            self.write(reg, value);
        }
    }
}

/// Simulated AS3935 on an SPI bus.
#[derive(Debug, Clone)]
pub struct SimAs3935 {
    chip: Arc<Mutex<ChipState>>,
}

impl Default for SimAs3935 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimAs3935 {
    pub fn new() -> Self {
        Self {
            chip: Arc::new(Mutex::new(ChipState::new())),
        }
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.chip.lock().read(reg)
    }

    /// Poke a register directly, bypassing write side effects.
    pub fn set_register(&self, reg: u8, value: u8) {
        self.chip.lock().regs[(reg & ADDR_MASK) as usize] = value;
    }

    /// Latch an interrupt reason into INT bits 3:0.
    pub fn set_interrupt(&self, reason: u8) {
        let mut c = self.chip.lock();
        let int = &mut c.regs[REG_INT as usize];
        *int = (*int & 0xF0) | (reason & 0x0F);
    }

    /// Latch a lightning interrupt with the given distance and energy.
    pub fn set_lightning(&self, distance: u8, energy: u32) {
        {
            let mut c = self.chip.lock();
            c.regs[0x04] = energy as u8;
            c.regs[0x05] = (energy >> 8) as u8;
            c.regs[0x06] = ((energy >> 16) as u8) & 0x1F;
            c.regs[0x07] = distance & 0x3F;
        }
        self.set_interrupt(0x08);
    }

    /// Fail the next `n` bus transactions.
    pub fn fail_next(&self, n: u32) {
        self.chip.lock().fail_next = n;
    }

    /// Fail every transaction until cleared.
    pub fn set_unresponsive(&self, on: bool) {
        self.chip.lock().unresponsive = on;
    }

    /// Drop writes to the LCO_FDIV nibble so the calibration echo fails.
    pub fn set_calibration_fault(&self, on: bool) {
        self.chip.lock().calibration_fault = on;
    }

    /// Pin the scratch register at 0x00 so the self-test sees a mismatch.
    pub fn set_scratch_stuck(&self, on: bool) {
        self.chip.lock().scratch_stuck = on;
    }

    pub fn transactions(&self) -> u64 {
        self.chip.lock().transactions
    }

    pub fn write_log(&self) -> Vec<(u8, u8)> {
        self.chip.lock().write_log.clone()
    }

    pub fn clear_write_log(&self) {
        self.chip.lock().write_log.clear();
    }
}

impl ErrorType for SimAs3935 {
    type Error = SimBusError;
}

impl SpiDevice for SimAs3935 {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SimBusError> {
        let mut chip = self.chip.lock();
        chip.transactions += 1;
        if chip.unresponsive {
            return Err(SimBusError);
        }
        if chip.fail_next > 0 {
            chip.fail_next -= 1;
            return Err(SimBusError);
        }

        // Chip select stays asserted across operations: gather the whole
        // outgoing frame, apply it once, then hand back the response bytes.
        let mut tx = Vec::new();
        for op in operations.iter() {
            match op {
                Operation::Write(w) => tx.extend_from_slice(w),
                Operation::Transfer(r, w) => {
                    let mut bytes = w.to_vec();
                    bytes.resize(r.len().max(w.len()), 0);
                    tx.extend_from_slice(&bytes);
                }
                Operation::TransferInPlace(b) => tx.extend_from_slice(b),
                Operation::Read(r) => tx.resize(tx.len() + r.len(), 0),
                Operation::DelayNs(_) => {}
            }
        }
        let mut rx = vec![0u8; tx.len()];
        chip.frame(&tx, &mut rx);
        drop(chip);

        let mut offset = 0;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(w) => offset += w.len(),
                Operation::Transfer(r, w) => {
                    let n = r.len().max(w.len());
                    r.copy_from_slice(&rx[offset..offset + r.len()]);
                    offset += n;
                }
                Operation::TransferInPlace(b) => {
                    let n = b.len();
                    b.copy_from_slice(&rx[offset..offset + n]);
                    offset += n;
                }
                Operation::Read(r) => {
                    let n = r.len();
                    r.copy_from_slice(&rx[offset..offset + n]);
                    offset += n;
                }
                Operation::DelayNs(_) => {}
            }
        }
        Ok(())
    }
}
