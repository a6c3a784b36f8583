//! An in-memory CMSIS-DAP responder used by the programmer's own test suite
//! (§8 testable properties).
//!
//! Implements the `HidDevice` trait directly: it decodes the same report
//! bytes a real adapter would see and answers with the same response
//! layout, so `DapLink`/`SwdSession`/`Session` exercise their real
//! encode/decode paths end to end without touching USB.

use std::time::Duration;

use crate::dap::Command;
use crate::device::{srom_opcode, PSOC6, SROM_SUCCESS};
use crate::error::Error;
use crate::hid::HidDevice;
use crate::swd::{CDBGPWRUPACK, CSYSPWRUPACK, PSOC6_AHB_AP_IDR};
use std::collections::HashMap;

/// `IDCODE` answered during Acquire, the DP of a real PSoC6.
const SIM_IDCODE: u32 = 0x6BA0_2477;

const SIM_ACK_OK: u8 = 0b001;

/// Simulated external flash address range; chosen clear of the SRAM/SROM
/// scratch addresses and the peripheral register addresses this crate
/// reads/writes, so a plain range check is enough to route an access.
const FLASH_BASE: u32 = 0x1000_0000;
const FLASH_LIMIT: u32 = 0x1010_0000;

/// A single-threaded, purely in-memory stand-in for a CMSIS-DAP probe
/// talking to a PSoC6.
pub struct DapSimulator {
    pending_response: Vec<u8>,

    ap_sel: u8,
    ap_bank: u8,
    csw: u32,
    tar: u32,
    pending_ap_value: u32,

    test_mode_reads: u32,

    scratch: HashMap<u32, u32>,
    flash: Vec<u8>,

    program_row_calls: u32,
    block_write_counts: HashMap<u32, u32>,
}

impl DapSimulator {
    pub fn new() -> Self {
        DapSimulator {
            pending_response: Vec::new(),
            ap_sel: 0,
            ap_bank: 0,
            csw: 0,
            tar: 0,
            pending_ap_value: 0,
            test_mode_reads: 0,
            scratch: HashMap::new(),
            flash: Vec::new(),
            program_row_calls: 0,
            block_write_counts: HashMap::new(),
        }
    }

    /// Direct access to the simulated flash array, for seeding test fixtures
    /// before a session is opened against it.
    pub fn flash_mut(&mut self) -> &mut Vec<u8> {
        &mut self.flash
    }

    /// Number of completed `ProgramRow` SROM calls.
    pub fn program_row_calls(&self) -> u32 {
        self.program_row_calls
    }

    /// Number of `DAP_TransferBlock` writes whose first word landed at
    /// `addr`.
    pub fn block_writes_to(&self, addr: u32) -> u32 {
        *self.block_write_counts.get(&addr).unwrap_or(&0)
    }

    fn handle(&mut self, report: &[u8]) -> Vec<u8> {
        let cmd = report[0];
        if cmd == Command::Connect as u8 {
            vec![cmd, if report[1] == 0 { 1 } else { report[1] }]
        } else if cmd == Command::Disconnect as u8 {
            vec![cmd]
        } else if cmd == Command::SwjClock as u8 {
            vec![cmd]
        } else if cmd == Command::SwjPins as u8 {
            vec![cmd, report[1]]
        } else if cmd == Command::SwjSequence as u8 {
            vec![cmd]
        } else if cmd == Command::TransferConfigure as u8 {
            vec![cmd]
        } else if cmd == Command::WriteAbort as u8 {
            vec![cmd]
        } else if cmd == Command::TransferAbort as u8 {
            vec![cmd]
        } else if cmd == Command::Transfer as u8 {
            self.handle_transfer(report)
        } else if cmd == Command::TransferBlock as u8 {
            self.handle_transfer_block(report)
        } else {
            vec![cmd]
        }
    }

    fn handle_transfer(&mut self, report: &[u8]) -> Vec<u8> {
        let cmd = report[0];
        let count = report[2] as usize;
        let mut offset = 3;
        let mut read_values = Vec::new();

        for _ in 0..count {
            let descriptor = report[offset];
            offset += 1;
            let access_port = descriptor & 0x01 != 0;
            let read = descriptor & 0x02 != 0;
            let addr_index = (descriptor >> 2) & 0x03;
            let match_value = descriptor & 0x10 != 0;

            let data = if !read || match_value {
                let word = u32::from_le_bytes(report[offset..offset + 4].try_into().unwrap());
                offset += 4;
                word
            } else {
                0
            };

            let value = self.transfer_reg(access_port, read, addr_index, data);
            if read {
                read_values.push(value.unwrap_or(0));
            }
        }

        let mut response = vec![cmd, count as u8, SIM_ACK_OK];
        for value in read_values {
            response.extend_from_slice(&value.to_le_bytes());
        }
        response
    }

    fn handle_transfer_block(&mut self, report: &[u8]) -> Vec<u8> {
        let cmd = report[0];
        let count = u16::from_le_bytes([report[2], report[3]]);
        let descriptor = report[4];
        let read = descriptor & 0x02 != 0;
        let start_tar = self.tar;

        let mut response = vec![cmd, report[2], report[3], SIM_ACK_OK];
        if read {
            for _ in 0..count {
                let value = self.mem_read_word(self.tar);
                self.tar = self.tar.wrapping_add(4);
                response.extend_from_slice(&value.to_le_bytes());
            }
        } else {
            let mut offset = 5;
            for _ in 0..count {
                let word = u32::from_le_bytes(report[offset..offset + 4].try_into().unwrap());
                offset += 4;
                self.mem_write_word(self.tar, word);
                self.tar = self.tar.wrapping_add(4);
            }
            *self.block_write_counts.entry(start_tar).or_insert(0) += 1;
        }
        response
    }

    fn transfer_reg(&mut self, access_port: bool, read: bool, addr_index: u8, data: u32) -> Option<u32> {
        if access_port {
            self.ap_register(read, addr_index, data)
        } else {
            self.dp_register(read, addr_index, data)
        }
    }

    /// `addr_index`: 0=IDCODE/ABORT, 1=CTRL_STAT, 2=SELECT, 3=RDBUFF.
    fn dp_register(&mut self, read: bool, addr_index: u8, data: u32) -> Option<u32> {
        match addr_index {
            0 => read.then_some(SIM_IDCODE),
            1 => read.then_some(CSYSPWRUPACK | CDBGPWRUPACK),
            2 => {
                if !read {
                    self.ap_sel = (data >> 24) as u8;
                    self.ap_bank = ((data >> 4) & 0xF) as u8;
                }
                None
            }
            3 => read.then_some(self.pending_ap_value),
            _ => None,
        }
    }

    /// `addr_index`: 0=CSW, 1=TAR, 3=DRW/IDR depending on the selected bank.
    fn ap_register(&mut self, read: bool, addr_index: u8, data: u32) -> Option<u32> {
        if self.ap_bank == 0xF {
            if addr_index == 3 && read {
                self.pending_ap_value = PSOC6_AHB_AP_IDR;
                return Some(PSOC6_AHB_AP_IDR);
            }
            return None;
        }

        match addr_index {
            0 => {
                if read {
                    Some(self.csw)
                } else {
                    self.csw = data;
                    None
                }
            }
            1 => {
                if read {
                    Some(self.tar)
                } else {
                    self.tar = data;
                    None
                }
            }
            3 => {
                if read {
                    let value = self.mem_read_word(self.tar);
                    self.pending_ap_value = value;
                    self.tar = self.tar.wrapping_add(4);
                    Some(value)
                } else {
                    self.mem_write_word(self.tar, data);
                    self.tar = self.tar.wrapping_add(4);
                    None
                }
            }
            _ => None,
        }
    }

    fn mem_read_word(&mut self, addr: u32) -> u32 {
        if addr == PSOC6.test_controller_addr {
            self.test_mode_reads += 1;
            if self.test_mode_reads >= 2 {
                0x8000_0000
            } else {
                0
            }
        } else if (FLASH_BASE..FLASH_LIMIT).contains(&addr) {
            let offset = (addr - FLASH_BASE) as usize;
            let mut bytes = [0xFFu8; 4];
            for (i, byte) in bytes.iter_mut().enumerate() {
                if let Some(&b) = self.flash.get(offset + i) {
                    *byte = b;
                }
            }
            u32::from_le_bytes(bytes)
        } else {
            *self.scratch.get(&addr).unwrap_or(&0)
        }
    }

    fn mem_write_word(&mut self, addr: u32, value: u32) {
        if (FLASH_BASE..FLASH_LIMIT).contains(&addr) {
            let offset = (addr - FLASH_BASE) as usize;
            if self.flash.len() < offset + 4 {
                self.flash.resize(offset + 4, 0xFF);
            }
            self.flash[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        } else {
            self.scratch.insert(addr, value);
            if addr == PSOC6.srom_trigger_reg {
                self.execute_srom_call(value);
            }
        }
    }

    fn read_data_byte(&mut self, base: u32, index: usize) -> u8 {
        let word_addr = base + ((index / 4) as u32) * 4;
        let word = self.mem_read_word(word_addr);
        word.to_le_bytes()[index % 4]
    }

    /// `value` is the parameter block address the host wrote to the trigger
    /// register (§4.H SROM call convention).
    fn execute_srom_call(&mut self, params_addr: u32) {
        let word0 = self.mem_read_word(params_addr);
        let word1 = self.mem_read_word(params_addr + 4);
        let word2 = self.mem_read_word(params_addr + 8);
        let opcode = (word0 >> 24) as u8;

        match opcode {
            srom_opcode::SILICON_ID => {
                self.mem_write_word(params_addr + 4, 0x0002_0304);
                let packed = (0x01u32 << 24) | (0x02u32 << 16) | u32::from(PSOC6.family_id);
                self.mem_write_word(params_addr + 8, packed);
            }
            srom_opcode::ERASE_SECTOR => {
                let offset = (word1 - FLASH_BASE) as usize;
                let sector_size = PSOC6.sector_size as usize;
                if self.flash.len() < offset + sector_size {
                    self.flash.resize(offset + sector_size, 0xFF);
                }
                for b in &mut self.flash[offset..offset + sector_size] {
                    *b = 0xFF;
                }
            }
            srom_opcode::PROGRAM_ROW => {
                let row_addr = word1;
                let data_addr = word2;
                let row_size = PSOC6.row_size as usize;
                let offset = (row_addr - FLASH_BASE) as usize;
                if self.flash.len() < offset + row_size {
                    self.flash.resize(offset + row_size, 0xFF);
                }
                for i in 0..row_size {
                    let byte = self.read_data_byte(data_addr, i);
                    self.flash[offset + i] = byte;
                }
                self.program_row_calls += 1;
            }
            srom_opcode::CHECKSUM_ROW => {
                let offset = (word1 - FLASH_BASE) as usize;
                let row_size = PSOC6.row_size as usize;
                let end = (offset + row_size).min(self.flash.len());
                let checksum = self.flash[offset..end]
                    .iter()
                    .fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)));
                self.mem_write_word(params_addr + 4, checksum);
            }
            _ => {}
        }
        self.mem_write_word(params_addr, SROM_SUCCESS);
    }
}

impl Default for DapSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl HidDevice for DapSimulator {
    fn write_report(&mut self, report: &[u8]) -> Result<(), Error> {
        self.pending_response = self.handle(report);
        Ok(())
    }

    fn read_report(&mut self, _timeout: Duration) -> Result<Vec<u8>, Error> {
        Ok(std::mem::take(&mut self.pending_response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_register_reads_as_set_only_on_second_poll() {
        let mut sim = DapSimulator::new();
        assert_eq!(sim.mem_read_word(PSOC6.test_controller_addr), 0);
        assert_eq!(sim.mem_read_word(PSOC6.test_controller_addr), 0x8000_0000);
    }

    #[test]
    fn erase_sector_srom_call_fills_with_0xff() {
        let mut sim = DapSimulator::new();
        sim.flash_mut().resize(PSOC6.sector_size as usize, 0x00);

        let params = PSOC6.srom_params_addr;
        let word0 = u32::from(srom_opcode::ERASE_SECTOR) << 24;
        sim.mem_write_word(params, word0);
        sim.mem_write_word(params + 4, FLASH_BASE);
        sim.execute_srom_call(params);

        assert!(sim.flash.iter().all(|&b| b == 0xFF));
        assert_eq!(sim.mem_read_word(params), SROM_SUCCESS);
    }

    #[test]
    fn program_row_copies_data_scratch_into_flash() {
        let mut sim = DapSimulator::new();
        let params = PSOC6.srom_params_addr;
        let data_addr = PSOC6.srom_data_addr;
        for i in 0..(PSOC6.row_size / 4) {
            sim.mem_write_word(data_addr + i * 4, 0xAAAA_AAAA);
        }
        let word0 = u32::from(srom_opcode::PROGRAM_ROW) << 24;
        sim.mem_write_word(params, word0);
        sim.mem_write_word(params + 4, FLASH_BASE);
        sim.mem_write_word(params + 8, data_addr);
        sim.execute_srom_call(params);

        assert_eq!(sim.program_row_calls(), 1);
        assert!(sim.flash[..PSOC6.row_size as usize].iter().all(|&b| b == 0xAA));
    }
}
