//! Family-specific constants and the types that describe a target once
//! acquired (§3 `DeviceFamily`, §4.H Silicon info).

use std::fmt;

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Per-family constants needed by the Acquire state machine and the SROM
/// call convention (§3).
#[derive(Debug, Clone, Copy)]
pub struct DeviceFamily {
    pub family_id: u16,
    pub name: &'static str,
    /// `TEST_MODE` register address polled during Acquire step 6.
    pub test_controller_addr: u32,
    /// SRAM address of the SROM parameter block (also where the result
    /// word is read back from, per §4.H).
    pub srom_params_addr: u32,
    /// SRAM scratch buffer used for row data bursts.
    pub srom_data_addr: u32,
    /// Register the host writes the parameter block address to in order to
    /// raise the SROM's software interrupt.
    pub srom_trigger_reg: u32,
    /// Smallest flash-programmable unit, 512 B on PSoC6 (§4.A).
    pub row_size: u32,
    /// Erase granularity; `EraseFlash` aligns outward to this (§4.H).
    pub sector_size: u32,
}

/// PSoC6 family constants (§6).
pub const PSOC6: DeviceFamily = DeviceFamily {
    family_id: 0x0100,
    name: "PSoC6",
    test_controller_addr: 0x4020_0100,
    srom_params_addr: 0x0800_0000,
    srom_data_addr: 0x0800_0800,
    srom_trigger_reg: 0x4020_0104,
    row_size: 512,
    sector_size: 256 * 512,
};

/// Opcodes for the SROM parameter block's word 0 high byte (§4.H SROM call
/// convention).
pub mod srom_opcode {
    pub const SILICON_ID: u8 = 0x00;
    pub const ERASE_SECTOR: u8 = 0x14;
    pub const PROGRAM_ROW: u8 = 0x06;
    pub const CHECKSUM_ROW: u8 = 0x0B;
}

/// SROM result sentinel values (§4.H).
pub const SROM_SUCCESS: u32 = 0xA000_0000;
pub const SROM_FAIL_MASK: u32 = 0xF000_0000;

/// The 3-word SROM call parameter block, laid out exactly as it is burst to
/// `srom_params_addr` (§4.H SROM call convention).
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
pub struct SromParams {
    pub word0: u32,
    pub word1: u32,
    pub word2: u32,
}

impl SromParams {
    pub fn new(opcode: u8, arg1: u32, arg2: u32) -> Self {
        SromParams { word0: u32::from(opcode) << 24, word1: arg1, word2: arg2 }
    }

    /// View this block as the three little-endian words `mem_write_block`
    /// expects.
    pub fn as_words(&self) -> &[u32] {
        bytemuck::cast_slice(bytemuck::bytes_of(self))
    }
}

/// The debug access port to open during Acquire (§4.H step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ap {
    Cm0,
    Cm4,
}

impl Ap {
    /// `APSEL` value for this AP on PSoC6.
    pub fn apsel(self) -> u8 {
        match self {
            Ap::Cm0 => 0,
            Ap::Cm4 => 1,
        }
    }
}

/// `Acquire` sub-mode (§3, §4.H, §9 Open Questions).
///
/// `Reset` is the only implemented mode; `Power` is recognised for
/// protocol completeness and immediately rejected by `acquire()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    Reset,
    Power,
}

/// Lifecycle protection state reported by the `SiliconID` SROM call
/// (§4.H Silicon info).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionState {
    Virgin,
    Normal,
    Secure,
    Dead,
}

impl ProtectionState {
    pub fn from_code(code: u8) -> Option<ProtectionState> {
        match code {
            0x01 => Some(ProtectionState::Virgin),
            0x02 => Some(ProtectionState::Normal),
            0x03 => Some(ProtectionState::Secure),
            0x04 => Some(ProtectionState::Dead),
            _ => None,
        }
    }

    /// Whether programming this device should be refused. The core itself
    /// does not block the attempt (§4.H); this is informational for callers.
    pub fn refuses_programming(self) -> bool {
        matches!(self, ProtectionState::Secure | ProtectionState::Dead)
    }
}

impl fmt::Display for ProtectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtectionState::Virgin => "VIRGIN",
            ProtectionState::Normal => "NORMAL",
            ProtectionState::Secure => "SECURE",
            ProtectionState::Dead => "DEAD",
        };
        f.write_str(s)
    }
}

/// Decoded `SiliconID` response (§4.H Silicon info).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub family_id: u16,
    pub silicon_id: u32,
    pub revision_id: u8,
    pub protection_state: ProtectionState,
}
