//! SWJ bring-up, DP init, AP select, and AP-MEM read/write (§4.G).

use log::{debug, info};

use crate::dap::{DapLink, Port, TransferRequest};
use crate::error::{AcquireError, Error};
use crate::hid::HidDevice;

/// DP register indices (2-bit `A[3:2]` field packed into the CMSIS-DAP
/// transfer request descriptor; the bank itself lives in `SELECT`).
pub mod dp {
    pub const IDCODE: u8 = 0;
    pub const ABORT: u8 = 0;
    pub const CTRL_STAT: u8 = 1;
    pub const SELECT: u8 = 2;
    pub const RDBUFF: u8 = 3;
}

/// MEM-AP register indices within the AP's currently selected bank.
pub mod ap {
    pub const CSW: u8 = 0;
    pub const TAR: u8 = 1;
    pub const DRW: u8 = 3;
    /// Index of `IDR` within bank `0xF`.
    pub const IDR: u8 = 3;
}

/// `CTRL/STAT` power-up request/acknowledge bits.
const CSYSPWRUPREQ: u32 = 1 << 30;
pub(crate) const CSYSPWRUPACK: u32 = 1 << 31;
const CDBGPWRUPREQ: u32 = 1 << 28;
pub(crate) const CDBGPWRUPACK: u32 = 1 << 29;
const STICKY_ERROR_BITS: u32 = (1 << 5) | (1 << 4) | (1 << 1);

/// `ABORT` bits that clear DP sticky-error state.
const ABORT_CLEAR_STICKY: u32 = 0x1E;

bitflags::bitflags! {
    /// MEM-AP `CSW` bits this crate cares about. `ADDRINC_SINGLE` auto-
    /// increments `TAR` by the access size after every `DRW` transfer,
    /// which every AP-MEM read/write in this module relies on (§4.G).
    struct CswFlags: u32 {
        const SIZE_32BIT     = 0b010;
        const ADDRINC_SINGLE = 0b01 << 4;
        const DEVICE_EN      = 1 << 6;
        const PROT_PRIV      = 1 << 25;
        const PROT_DATA      = 1 << 24;
    }
}

/// `CSW` value selecting 32-bit transfer size with single auto-increment,
/// used for all AP-MEM block operations (§4.G).
pub const CSW_32BIT_AUTOINC: u32 = CswFlags::SIZE_32BIT.bits()
    | CswFlags::ADDRINC_SINGLE.bits()
    | CswFlags::DEVICE_EN.bits()
    | CswFlags::PROT_PRIV.bits()
    | CswFlags::PROT_DATA.bits();

/// The `0xE79E` JTAG-to-SWD line reset + selection sequence, preceded and
/// followed by at least 50 cycles of `1` (§4.G SWJ bring-up).
const SWJ_SELECT_SEQUENCE: [u8; 9] = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // 56 cycles of 1
    0x9E, 0xE7, // 0xE79E selection sequence, LSB first
    0xFF, // additional idle cycles to re-arm the reset
];

/// AHB-AP `IDR` class expected on a PSoC6 CM0+/CM4 debug access port.
pub const PSOC6_AHB_AP_IDR: u32 = 0x0404_0000;

/// Cached `CSW`/`TAR` state for a MEM-AP so redundant writes can be elided
/// when the next access matches the predicted auto-increment (§4.G).
#[derive(Debug, Clone, Copy, Default)]
struct ApMemCache {
    csw: Option<u32>,
    tar: Option<u32>,
}

/// A live SWD session over a single DAP link: DP state plus the selected
/// AP's cached `CSW`/`TAR` (§3 `TargetSession`).
pub struct SwdSession<D> {
    pub dap: DapLink<D>,
    ap_sel: u8,
    selected_bank: Option<(u8, u8)>,
    cache: ApMemCache,
}

impl<D: HidDevice> SwdSession<D> {
    pub fn new(dap: DapLink<D>) -> Self {
        SwdSession { dap, ap_sel: 0, selected_bank: None, cache: ApMemCache::default() }
    }

    /// Drive the JTAG-to-SWD line reset + selection sequence (§4.G SWJ
    /// bring-up).
    pub fn swj_bring_up(&mut self) -> Result<(), Error> {
        self.dap.connect(Port::Swd)?;
        self.dap.swj_sequence(56 + 16 + 8, &SWJ_SELECT_SEQUENCE)?;
        Ok(())
    }

    /// Read the DP `IDCODE`, the first transaction after a line reset
    /// (§4.G DP init, §4.H Acquire step 3).
    pub fn read_idcode(&mut self) -> Result<u32, Error> {
        let values = self.dap.transfer(&[TransferRequest::read_dp(dp::IDCODE)])?;
        values.first().copied().ok_or_else(|| AcquireError::NoSwdResponse.into())
    }

    /// Clear DP sticky-error bits via `ABORT` (§4.G DP init).
    pub fn clear_sticky_errors(&mut self) -> Result<(), Error> {
        self.dap.transfer(&[TransferRequest::write_dp(dp::ABORT, ABORT_CLEAR_STICKY)])?;
        Ok(())
    }

    /// Request system + debug domain power-up and wait for both acks
    /// (§4.G DP init).
    pub fn power_up(&mut self) -> Result<(), Error> {
        self.dap.transfer(&[TransferRequest::write_dp(
            dp::CTRL_STAT,
            CSYSPWRUPREQ | CDBGPWRUPREQ,
        )])?;

        for _ in 0..50 {
            let values = self.dap.transfer(&[TransferRequest::read_dp(dp::CTRL_STAT)])?;
            let ctrl_stat = values[0];
            if ctrl_stat & CSYSPWRUPACK != 0 && ctrl_stat & CDBGPWRUPACK != 0 {
                if ctrl_stat & STICKY_ERROR_BITS != 0 {
                    self.clear_sticky_errors()?;
                }
                return Ok(());
            }
        }
        Err(AcquireError::NoSwdResponse.into())
    }

    /// Select an AP and bank via `SELECT` (§4.G AP select). `ap` is the
    /// 8-bit `APSEL` field, `bank` the 4-bit `APBANKSEL`. A no-op when the
    /// requested (ap, bank) pair is already selected.
    pub fn select_ap(&mut self, ap: u8, bank: u8) -> Result<(), Error> {
        if self.selected_bank == Some((ap, bank)) {
            self.ap_sel = ap;
            return Ok(());
        }
        let select = (u32::from(ap) << 24) | (u32::from(bank) << 4);
        self.dap.transfer(&[TransferRequest::write_dp(dp::SELECT, select)])?;
        self.ap_sel = ap;
        self.selected_bank = Some((ap, bank));
        // switching banks invalidates anything the CSW/TAR cache predicted.
        self.cache = ApMemCache::default();
        Ok(())
    }

    /// Read an AP register's `IDR` (bank 0xF) to confirm it is a PSoC6
    /// AHB-AP (§4.H Acquire step 5).
    pub fn read_ap_idr(&mut self) -> Result<u32, Error> {
        self.select_ap(self.ap_sel, 0xF)?;
        self.dap.transfer(&[TransferRequest::read_ap(ap::IDR)])?;
        // AP reads are posted: the result of the *previous* AP read is
        // returned by RDBUFF.
        let values = self.dap.transfer(&[TransferRequest::read_dp(dp::RDBUFF)])?;
        values.first().copied().ok_or_else(|| AcquireError::NoSwdResponse.into())
    }

    fn ensure_csw(&mut self, csw: u32) -> Result<(), Error> {
        if self.cache.csw != Some(csw) {
            self.dap.transfer(&[TransferRequest::write_ap(ap::CSW, csw)])?;
            self.cache.csw = Some(csw);
        }
        Ok(())
    }

    fn ensure_tar(&mut self, addr: u32) -> Result<(), Error> {
        if self.cache.tar != Some(addr) {
            self.dap.transfer(&[TransferRequest::write_ap(ap::TAR, addr)])?;
            self.cache.tar = Some(addr);
        }
        Ok(())
    }

    /// Write a single word through `DRW`. `addr` must be word-aligned.
    pub fn mem_write_word(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        self.select_ap(self.ap_sel, 0x0)?;
        self.ensure_csw(CSW_32BIT_AUTOINC)?;
        self.ensure_tar(addr)?;
        self.dap.transfer(&[TransferRequest::write_ap(ap::DRW, value)])?;
        self.cache.tar = Some(addr.wrapping_add(4));
        Ok(())
    }

    /// Read a single word through `DRW`.
    pub fn mem_read_word(&mut self, addr: u32) -> Result<u32, Error> {
        self.select_ap(self.ap_sel, 0x0)?;
        self.ensure_csw(CSW_32BIT_AUTOINC)?;
        self.ensure_tar(addr)?;
        self.dap.transfer(&[TransferRequest::read_ap(ap::DRW)])?;
        let values = self.dap.transfer(&[TransferRequest::read_dp(dp::RDBUFF)])?;
        self.cache.tar = Some(addr.wrapping_add(4));
        values.first().copied().ok_or_else(|| AcquireError::NoSwdResponse.into())
    }

    /// Burst-write `words` starting at `addr` via `TransferBlock`, relying
    /// on AP auto-increment; `addr` must be word-aligned (§4.G AP-MEM).
    pub fn mem_write_block(&mut self, addr: u32, words: &[u32]) -> Result<(), Error> {
        self.select_ap(self.ap_sel, 0x0)?;
        self.ensure_csw(CSW_32BIT_AUTOINC)?;
        self.ensure_tar(addr)?;
        let mut data = words.to_vec();
        self.dap.transfer_block(TransferRequest::write_ap(ap::DRW, 0), &mut data)?;
        self.cache.tar = Some(addr.wrapping_add(4 * words.len() as u32));
        Ok(())
    }

    /// Burst-read `count` words starting at `addr` via `TransferBlock`.
    pub fn mem_read_block(&mut self, addr: u32, count: usize) -> Result<Vec<u32>, Error> {
        self.select_ap(self.ap_sel, 0x0)?;
        self.ensure_csw(CSW_32BIT_AUTOINC)?;
        self.ensure_tar(addr)?;
        let mut data = vec![0u32; count];
        self.dap.transfer_block(TransferRequest::read_ap(ap::DRW), &mut data)?;
        self.cache.tar = Some(addr.wrapping_add(4 * count as u32));
        Ok(data)
    }

    /// Burst-write raw bytes (padded to a whole number of words) to SRAM.
    pub fn mem_write_bytes(&mut self, addr: u32, bytes: &[u8]) -> Result<(), Error> {
        debug!("mem_write_bytes: {} bytes at {:#010x}", bytes.len(), addr);
        let mut words = Vec::with_capacity(bytes.len().div_ceil(4));
        for chunk in bytes.chunks(4) {
            let mut word_bytes = [0u8; 4];
            word_bytes[..chunk.len()].copy_from_slice(chunk);
            words.push(u32::from_le_bytes(word_bytes));
        }
        self.mem_write_block(addr, &words)
    }

    /// Burst-read `len` raw bytes from SRAM/flash.
    pub fn mem_read_bytes(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        let words = self.mem_read_block(addr, len.div_ceil(4))?;
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(len);
        Ok(bytes)
    }

    pub fn into_dap(self) -> DapLink<D> {
        self.dap
    }
}

/// `SWJ_Pins` bit for `nRESET`, used to drive `SRST` low-then-high (§4.H
/// Acquire step 1/3).
pub const PIN_NRESET: u8 = 1 << 7;

pub fn pulse_srst_low<D: HidDevice>(dap: &mut DapLink<D>, hold: std::time::Duration) -> Result<(), Error> {
    dap.swj_pins(0x00, PIN_NRESET, 0)?;
    std::thread::sleep(hold);
    dap.swj_pins(PIN_NRESET, PIN_NRESET, 0)?;
    info!("SRST pulsed, held for {:?}", hold);
    Ok(())
}
