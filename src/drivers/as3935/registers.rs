//! AS3935 register map and fixed configuration tables.
//!
//! | Reg  | Bits | Field                                 |
//! |------|------|---------------------------------------|
//! | 0x00 | 5:1  | AFE_GB (gain boost), bit 0 = PWD      |
//! | 0x01 | 6:4  | NF_LEV, 3:0 = WDTH                    |
//! | 0x02 | 7:4  | SREJ                                  |
//! | 0x03 | 7:4  | LCO_FDIV / MASK_DIST, 3:0 = INT       |
//! | 0x04 | 7:0  | S_LIG_L                               |
//! | 0x05 | 7:0  | S_LIG_M                               |
//! | 0x06 | 4:0  | S_LIG_MM                              |
//! | 0x07 | 5:0  | DISTANCE (0x3F = out of range)        |
//! | 0x08 | 7    | DISP_LCO                              |
//! | 0x3C | 7:0  | scratch / preset                      |

use crate::config::Sensitivity;

pub const REG_AFE_GAIN: u8 = 0x00;
pub const REG_NOISE_WDTH: u8 = 0x01;
pub const REG_SREJ: u8 = 0x02;
pub const REG_INT: u8 = 0x03;
pub const REG_ENERGY_L: u8 = 0x04;
pub const REG_ENERGY_M: u8 = 0x05;
pub const REG_ENERGY_MM: u8 = 0x06;
pub const REG_DISTANCE: u8 = 0x07;
pub const REG_DISP_LCO: u8 = 0x08;
pub const REG_SCRATCH: u8 = 0x3C;

/// Address mask; the top two bits of the command byte select the mode.
pub const ADDR_MASK: u8 = 0x3F;
/// Command bit 6 set = read.
pub const READ_FLAG: u8 = 0x40;

/// PWD bit in register 0x00.
pub const PWD_BIT: u8 = 0x01;
/// Value written to 0x00 at the start of power-up (PWD clear).
pub const POWER_ON: u8 = 0x96;
/// LCO_FDIV / MASK_DIST pattern written to 0x03 during calibration.
pub const CALIBRATION_PATTERN: u8 = 0b1001_0111;
/// Only the upper nibble of 0x03 is writable; the low nibble is INT.
pub const CALIBRATION_ECHO_MASK: u8 = 0xF0;
pub const DISP_LCO_ON: u8 = 0x80;
pub const DISP_LCO_OFF: u8 = 0x00;

/// AFE_GB for indoor use, pre-shifted into bits 5:1 (PWD = 0).
pub const AFE_INDOOR: u8 = 0b1_0010 << 1;
/// AFE_GB for outdoor use, pre-shifted into bits 5:1 (PWD = 0).
pub const AFE_OUTDOOR: u8 = 0b0_1110 << 1;

pub const NOISE_FLOOR_MAX: u8 = 7;
pub const NOISE_FLOOR_SHIFT: u8 = 4;
pub const NOISE_FLOOR_MASK: u8 = 0x70;
pub const WDTH_MASK: u8 = 0x0F;
pub const SREJ_SHIFT: u8 = 4;

/// Pattern written to the scratch register by the health check.
pub const SCRATCH_PATTERN: u8 = 0xA5;

/// Front-end settings for one sensitivity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub spike_rejection: u8,
    pub noise_floor: u8,
    pub watchdog_width: u8,
}

impl Tier {
    pub const fn for_sensitivity(s: Sensitivity) -> Self {
        match s {
            Sensitivity::Low => Self {
                spike_rejection: 3,
                noise_floor: 4,
                watchdog_width: 3,
            },
            Sensitivity::Medium => Self {
                spike_rejection: 2,
                noise_floor: 2,
                watchdog_width: 2,
            },
            Sensitivity::High => Self {
                spike_rejection: 1,
                noise_floor: 1,
                watchdog_width: 1,
            },
        }
    }

    /// Combined NF_LEV / WDTH byte for register 0x01.
    pub const fn noise_wdth_register(self) -> u8 {
        (self.noise_floor << NOISE_FLOOR_SHIFT) | (self.watchdog_width & WDTH_MASK)
    }
}

pub const fn afe_gain(indoor: bool) -> u8 {
    if indoor { AFE_INDOOR } else { AFE_OUTDOOR }
}

/// Assemble the strike energy from S_LIG_L / S_LIG_M / S_LIG_MM.
pub const fn decode_energy(lsb: u8, msb: u8, mmsb: u8) -> u32 {
    ((mmsb as u32 & 0x1F) << 16) | ((msb as u32) << 8) | lsb as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_table_matches_register_layout() {
        assert_eq!(Tier::for_sensitivity(Sensitivity::Low).noise_wdth_register(), 0x43);
        assert_eq!(Tier::for_sensitivity(Sensitivity::Medium).noise_wdth_register(), 0x22);
        assert_eq!(Tier::for_sensitivity(Sensitivity::High).noise_wdth_register(), 0x11);
    }

    #[test]
    fn afe_values_leave_pwd_clear() {
        assert_eq!(afe_gain(true), 0x24);
        assert_eq!(afe_gain(false), 0x1C);
        assert_eq!(afe_gain(true) & PWD_BIT, 0);
        assert_eq!(afe_gain(false) & PWD_BIT, 0);
    }

    #[test]
    fn energy_is_little_endian_with_masked_top() {
        assert_eq!(decode_energy(0x90, 0xD0, 0x03), 250_000);
        assert_eq!(decode_energy(0xFF, 0xFF, 0xFF), 0x1F_FFFF);
        assert_eq!(decode_energy(0, 0, 0), 0);
    }
}
