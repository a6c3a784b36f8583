//! Acquire, the SROM call convention, and the erase/program/verify
//! algorithms (§4.H). This is the crate's top-level, blocking API (§6
//! Programmer API; §9: strictly blocking, no hidden background tasks).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::SessionConfig;
use crate::dap::DapLink;
use crate::device::{
    srom_opcode, Ap, AcquireMode, DeviceFamily, DeviceInfo, ProtectionState, PSOC6, SROM_FAIL_MASK,
    SROM_SUCCESS,
};
use crate::error::{AcquireError, Error};
use crate::firmware::FirmwareRecord;
use crate::hid::{self, HidApiDevice, HidDevice, ProbeInfo};
use crate::progress::{emit_progress, ProgressSink};
use crate::segment::Segment;
use crate::swd::{self, SwdSession};

/// Acquire state machine states (§3, §4.H).
///
/// Transitions here follow the order the Acquire *steps* actually execute
/// (the AP must be open before the test-mode register write), which
/// differs slightly from the state list's prose order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireState {
    Idle,
    ResetHeld,
    ApOpened,
    WaitTestMode,
    Ready,
}

/// A cooperative cancellation flag shared between the caller and a
/// long-running operation (§5).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A bound programming session: probe handle, SWD state, and Acquire
/// state, exclusively owned for its lifetime (§3 `TargetSession`).
pub struct Session<D: HidDevice> {
    swd: SwdSession<D>,
    family: DeviceFamily,
    config: SessionConfig,
    state: AcquireState,
    sink: Box<dyn ProgressSink>,
}

/// Enumerate HID devices matching the CMSIS-DAP USB interface convention
/// (§4.E, §6 Programmer API).
pub fn scan() -> Result<Vec<ProbeInfo>, Error> {
    hid::scan()
}

impl Session<HidApiDevice> {
    /// Open a probe discovered by [`scan`] (§6 Programmer API `open`).
    pub fn open(info: &ProbeInfo, config: SessionConfig, sink: Box<dyn ProgressSink>) -> Result<Self, Error> {
        let device = hid::open(info)?;
        Ok(Session::from_device(device, config, sink))
    }
}

impl<D: HidDevice> Session<D> {
    /// Wrap an already-open transport (used by tests and simulators).
    pub fn from_device(device: D, config: SessionConfig, sink: Box<dyn ProgressSink>) -> Self {
        let dap = DapLink::new(device)
            .with_retry_count(config.dap_wait_retries)
            .with_read_timeout(config.hid_read_timeout);
        Session {
            swd: SwdSession::new(dap),
            family: PSOC6,
            config,
            state: AcquireState::Idle,
            sink,
        }
    }

    pub fn state(&self) -> AcquireState {
        self.state
    }

    fn check_cancel(&self, cancel: &CancelFlag) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Cooperative cancel handling shared by every long operation (§5):
    /// abort the outstanding transfer, clear DP sticky bits, release SRST,
    /// and fall back to `Idle`.
    fn handle_cancel(&mut self) -> Error {
        self.swd.dap.write_abort(0x1E).ok();
        self.swd.clear_sticky_errors().ok();
        self.swd.dap.swj_pins(swd::PIN_NRESET, swd::PIN_NRESET, 0).ok();
        self.state = AcquireState::Idle;
        Error::Cancelled
    }

    /// Run the Acquire state machine (§4.H).
    ///
    /// `AcquireMode::Power` is recognised but not implemented (§9): it is
    /// rejected immediately rather than silently falling back to reset
    /// behavior.
    pub fn acquire(&mut self, mode: AcquireMode, ap: Ap, cancel: &CancelFlag) -> Result<(), Error> {
        if mode == AcquireMode::Power {
            return Err(Error::UnsupportedAcquireMode("Power"));
        }

        self.state = AcquireState::Idle;
        self.sink.log("acquiring target");

        swd::pulse_srst_low(&mut self.swd.dap, Duration::from_millis(2))?;
        self.state = AcquireState::ResetHeld;

        let deadline = Instant::now() + self.config.acquire_deadline;
        loop {
            if self.check_cancel(cancel).is_err() {
                return Err(self.handle_cancel());
            }
            if Instant::now() >= deadline {
                self.state = AcquireState::Idle;
                return Err(AcquireError::Timeout.into());
            }

            if self.swd.swj_bring_up().is_err() {
                continue;
            }
            match self.swd.read_idcode() {
                Ok(idcode) if idcode != 0 && idcode != 0xFFFF_FFFF => {
                    debug!("acquired IDCODE {idcode:#010x}");
                    break;
                }
                _ => continue,
            }
        }

        self.swd.clear_sticky_errors()?;
        self.swd.power_up()?;

        self.swd.select_ap(ap.apsel(), 0xF)?;
        let idr = self.swd.read_ap_idr()?;
        if idr & 0xFFFF_F000 != swd::PSOC6_AHB_AP_IDR & 0xFFFF_F000 {
            self.state = AcquireState::Idle;
            return Err(AcquireError::NoSwdResponse.into());
        }
        self.state = AcquireState::ApOpened;

        self.state = AcquireState::WaitTestMode;
        self.swd.mem_write_word(self.family.test_controller_addr, 0x8000_0000)?;
        let test_mode_deadline = Instant::now() + self.config.acquire_deadline;
        loop {
            if self.check_cancel(cancel).is_err() {
                return Err(self.handle_cancel());
            }
            if Instant::now() >= test_mode_deadline {
                self.state = AcquireState::Idle;
                return Err(AcquireError::TestModeNotEntered.into());
            }
            let value = self.swd.mem_read_word(self.family.test_controller_addr)?;
            if value & 0x8000_0000 != 0 {
                break;
            }
        }

        self.state = AcquireState::Ready;
        self.sink.log("target ready");
        Ok(())
    }

    /// Invoke an SROM routine: write the parameter block, trigger the
    /// interrupt, and poll the result word until it's the success or
    /// failure sentinel (§4.H SROM call convention).
    fn srom_call(&mut self, words: &[u32], cancel: &CancelFlag) -> Result<(), Error> {
        self.swd.mem_write_block(self.family.srom_params_addr, words)?;
        self.swd.mem_write_word(self.family.srom_trigger_reg, self.family.srom_params_addr)?;

        let deadline = Instant::now() + self.config.srom_poll_timeout;
        loop {
            if self.check_cancel(cancel).is_err() {
                return Err(self.handle_cancel());
            }
            if Instant::now() >= deadline {
                return Err(Error::Srom(0xFFFF_FFFF));
            }
            let result = self.swd.mem_read_word(self.family.srom_params_addr)?;
            if result == SROM_SUCCESS {
                return Ok(());
            }
            if result & SROM_FAIL_MASK == SROM_FAIL_MASK {
                let error_id = result & 0x0FFF_FFFF;
                warn!("SROM call failed with error id {error_id:#x}");
                return Err(Error::Srom(error_id));
            }
        }
    }

    /// `SiliconID` SROM call, decoding `(family_id, silicon_id, revision_id,
    /// protection_state)` (§4.H Silicon info).
    pub fn get_info(&mut self, cancel: &CancelFlag) -> Result<DeviceInfo, Error> {
        let word0 = u32::from(srom_opcode::SILICON_ID) << 24;
        self.srom_call(&[word0, 0, 0], cancel)?;

        let silicon_id = self.swd.mem_read_word(self.family.srom_params_addr + 4)?;
        let packed = self.swd.mem_read_word(self.family.srom_params_addr + 8)?;
        let revision_id = (packed >> 24) as u8;
        let protection_code = ((packed >> 16) & 0xFF) as u8;
        let family_id = (packed & 0xFFFF) as u16;

        let protection_state = ProtectionState::from_code(protection_code)
            .unwrap_or(ProtectionState::Normal);

        if protection_state.refuses_programming() {
            self.sink.log(&format!("target protection state is {protection_state}"));
        }

        Ok(DeviceInfo { family_id, silicon_id, revision_id, protection_state })
    }

    /// `EraseFlash(start, end)`: aligns outward to sector boundaries and
    /// invokes `EraseSector` repeatedly (§4.H Erase algorithm).
    pub fn erase(&mut self, start: u32, end: u32, cancel: &CancelFlag) -> Result<(), Error> {
        let sector_size = self.family.sector_size;
        let aligned_start = start & !(sector_size - 1);
        let aligned_end = (end & !(sector_size - 1)).saturating_add(sector_size - 1).max(end);

        let mut addr = aligned_start;
        while addr <= aligned_end {
            if cancel.is_cancelled() {
                return Err(self.handle_cancel());
            }
            let word0 = u32::from(srom_opcode::ERASE_SECTOR) << 24;
            self.srom_call(&[word0, addr], cancel)?;
            self.sink.log(&format!("erased sector at {addr:#010x}"));
            addr = addr.saturating_add(sector_size);
            if addr == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Program one contiguous block: row-align, pad with `0xFF`, burst the
    /// row to SRAM scratch, trigger `ProgramRow`, and emit progress after
    /// every row (§4.H Programming algorithm).
    fn program_segment(&mut self, segment: &Segment, done_before: u64, total: u64, cancel: &CancelFlag) -> Result<u64, Error> {
        let row_size = self.family.row_size;
        let aligned_start = segment.first() & !(row_size - 1);
        let mut data = segment.data().to_vec();

        // pad the leading partial row so row index 0 starts at aligned_start
        let lead_pad = (segment.first() - aligned_start) as usize;
        if lead_pad > 0 {
            let mut padded = vec![0xFFu8; lead_pad];
            padded.extend_from_slice(&data);
            data = padded;
        }
        let row_count = data.len().div_ceil(row_size as usize);
        data.resize(row_count * row_size as usize, 0xFF);

        let mut done = done_before;
        for row in 0..row_count {
            if cancel.is_cancelled() {
                return Err(self.handle_cancel());
            }
            let row_addr = aligned_start + row as u32 * row_size;
            let row_bytes = &data[row * row_size as usize..(row + 1) * row_size as usize];

            self.swd.mem_write_bytes(self.family.srom_data_addr, row_bytes)?;

            let word0 = u32::from(srom_opcode::PROGRAM_ROW) << 24;
            self.srom_call(&[word0, row_addr, self.family.srom_data_addr], cancel)?;

            done += row_bytes.len() as u64;
            emit_progress(self.sink.as_ref(), done, total);
        }
        Ok(done)
    }

    /// Program a single byte range at `start` (§6 Programmer API `program`).
    pub fn program(&mut self, bytes: &[u8], start: u32, cancel: &CancelFlag) -> Result<(), Error> {
        let segment = Segment::new(start, bytes.to_vec());
        let total = bytes.len() as u64;
        self.sink.log(&format!("programming {total} bytes at {start:#010x}"));
        self.program_segment(&segment, 0, total, cancel)?;
        Ok(())
    }

    /// Program every `ApplicationFlash` block of a classified, merged
    /// firmware record, in insertion order (§4.H Programming algorithm).
    pub fn program_record(&mut self, record: &FirmwareRecord, cancel: &CancelFlag) -> Result<(), Error> {
        let total = record.total_bytes();
        let mut done = 0;
        for segment in &record.application_flash {
            done = self.program_segment(segment, done, total, cancel)?;
        }
        Ok(())
    }

    /// Row-wise read-back verify against `bytes` (§4.H Verify algorithm).
    pub fn verify(&mut self, bytes: &[u8], start: u32, cancel: &CancelFlag) -> Result<(), Error> {
        let row_size = self.family.row_size as usize;
        for (offset, chunk) in bytes.chunks(row_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(self.handle_cancel());
            }
            let addr = start + (offset * row_size) as u32;
            let actual = self.swd.mem_read_bytes(addr, chunk.len())?;
            for (i, (&expected, &actual)) in chunk.iter().zip(actual.iter()).enumerate() {
                if expected != actual {
                    return Err(Error::VerifyMismatch { addr: addr + i as u32, expected, actual });
                }
            }
        }
        Ok(())
    }

    /// Verify using the `ChecksumRow` SROM call instead of a full read-back,
    /// for speed where the caller opts in (§4.H Verify algorithm).
    pub fn verify_checksum(&mut self, bytes: &[u8], start: u32, cancel: &CancelFlag) -> Result<(), Error> {
        let row_size = self.family.row_size as usize;
        for (offset, chunk) in bytes.chunks(row_size).enumerate() {
            let addr = start + (offset * row_size) as u32;
            let expected_checksum = chunk.iter().fold(0u32, |acc, &b| acc.wrapping_add(b as u32));

            let word0 = u32::from(srom_opcode::CHECKSUM_ROW) << 24;
            self.srom_call(&[word0, addr], cancel)?;
            let actual_checksum = self.swd.mem_read_word(self.family.srom_params_addr + 4)?;

            if actual_checksum != expected_checksum {
                return Err(Error::VerifyMismatch {
                    addr,
                    expected: expected_checksum as u8,
                    actual: actual_checksum as u8,
                });
            }
        }
        Ok(())
    }

    /// Release the session (§6 Programmer API `close`).
    pub fn close(mut self) -> Result<(), Error> {
        self.swd.dap.disconnect()?;
        self.state = AcquireState::Idle;
        info!("session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::DapSimulator;

    fn session(sim: DapSimulator) -> Session<DapSimulator> {
        Session::from_device(sim, SessionConfig::default(), Box::new(crate::progress::NullSink))
    }

    #[test]
    fn acquire_succeeds_within_deadline() {
        let sim = DapSimulator::new();
        let mut session = session(sim);
        let cancel = CancelFlag::new();
        session.acquire(AcquireMode::Reset, Ap::Cm0, &cancel).unwrap();
        assert_eq!(session.state(), AcquireState::Ready);
    }

    #[test]
    fn acquire_power_mode_is_rejected() {
        let sim = DapSimulator::new();
        let mut session = session(sim);
        let cancel = CancelFlag::new();
        let err = session.acquire(AcquireMode::Power, Ap::Cm0, &cancel).unwrap_err();
        assert!(matches!(err, Error::UnsupportedAcquireMode("Power")));
    }

    #[test]
    fn program_issues_one_block_write_and_one_program_row() {
        let sim = DapSimulator::new();
        let mut session = session(sim);
        let cancel = CancelFlag::new();
        session.acquire(AcquireMode::Reset, Ap::Cm0, &cancel).unwrap();

        session.program(&[0xAA; 512], 0x1000_0000, &cancel).unwrap();
        assert_eq!(session.swd.dap.device().program_row_calls(), 1);
        assert_eq!(session.swd.dap.device().block_writes_to(session.family.srom_data_addr), 1);
    }

    #[test]
    fn verify_reports_first_mismatch() {
        let sim = DapSimulator::new();
        sim.flash_mut().extend_from_slice(&[0u8; 512]);
        sim.flash_mut()[100] = 0x55;
        let mut session = session(sim);
        let cancel = CancelFlag::new();
        session.acquire(AcquireMode::Reset, Ap::Cm0, &cancel).unwrap();

        let err = session.verify(&[0xAA; 512], 0x1000_0000, &cancel).unwrap_err();
        match err {
            Error::VerifyMismatch { addr, expected, actual } => {
                assert_eq!(addr, 0x1000_0064);
                assert_eq!(expected, 0xAA);
                assert_eq!(actual, 0x55);
            }
            other => panic!("expected VerifyMismatch, got {other:?}"),
        }
    }

    #[test]
    fn cancel_between_rows_returns_cancelled() {
        let sim = DapSimulator::new();
        let mut session = session(sim);
        let cancel = CancelFlag::new();
        session.acquire(AcquireMode::Reset, Ap::Cm0, &cancel).unwrap();
        cancel.cancel();
        let err = session.program(&[0xAA; 1024], 0x1000_0000, &cancel).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(session.state(), AcquireState::Idle);
    }
}
