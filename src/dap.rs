//! CMSIS-DAP v1 command encoding/decoding and the DP/AP transfer
//! sub-protocol, including auto-retry on `WAIT` (§4.F).

use std::time::Duration;

use log::{debug, warn};

use crate::error::{DapError, Error};
use crate::hid::{HidDevice, DEFAULT_READ_TIMEOUT};

/// CMSIS-DAP v1 command bytes actually used by this crate (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Info = 0x00,
    HostStatus = 0x01,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    TransferBlock = 0x06,
    TransferAbort = 0x07,
    WriteAbort = 0x08,
    Delay = 0x09,
    ResetTarget = 0x0A,
    SwjPins = 0x10,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
    JtagSequence = 0x14,
    JtagConfigure = 0x15,
    JtagIdcode = 0x16,
}

/// `DAP_Connect` port selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Port {
    Default = 0,
    Swd = 1,
    Jtag = 2,
}

/// The acknowledge code returned for a single transfer request (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Wait,
    Fault,
    ProtocolError,
    NoAck,
}

const ACK_OK: u8 = 0b001;
const ACK_WAIT: u8 = 0b010;
const ACK_FAULT: u8 = 0b100;
const ACK_PROTOCOL_ERROR_BIT: u8 = 0x08;

impl Ack {
    fn from_response_byte(byte: u8) -> Ack {
        if byte & ACK_PROTOCOL_ERROR_BIT != 0 {
            return Ack::ProtocolError;
        }
        match byte & 0x07 {
            ACK_OK => Ack::Ok,
            ACK_WAIT => Ack::Wait,
            ACK_FAULT => Ack::Fault,
            _ => Ack::NoAck,
        }
    }

    fn into_error(self) -> DapError {
        match self {
            Ack::Ok => unreachable!("Ok is not an error"),
            Ack::Wait => unreachable!("Wait is retried, not surfaced"),
            Ack::Fault => DapError::Fault,
            Ack::ProtocolError => DapError::ProtocolError,
            Ack::NoAck => DapError::NoAck,
        }
    }
}

/// A single DP/AP transfer request (§3).
///
/// `register` packs the CMSIS-DAP request descriptor bits: bit0 selects
/// AP (1) vs DP (0), bit1 is R(1)/W(0), bits2-3 are the 2-bit register
/// address (bank offset), bit4 requests `ValueMatch`, bit5 requests a
/// `MatchMask` write.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest {
    pub access_port: bool,
    pub read: bool,
    pub address: u8,
    pub match_value: bool,
    pub data: u32,
}

impl TransferRequest {
    pub fn read_dp(address: u8) -> Self {
        TransferRequest { access_port: false, read: true, address, match_value: false, data: 0 }
    }

    pub fn write_dp(address: u8, data: u32) -> Self {
        TransferRequest { access_port: false, read: false, address, match_value: false, data }
    }

    pub fn read_ap(address: u8) -> Self {
        TransferRequest { access_port: true, read: true, address, match_value: false, data: 0 }
    }

    pub fn write_ap(address: u8, data: u32) -> Self {
        TransferRequest { access_port: true, read: false, address, match_value: false, data }
    }

    fn descriptor_byte(&self) -> u8 {
        let mut byte = 0u8;
        if self.access_port {
            byte |= 0x01;
        }
        if self.read {
            byte |= 0x02;
        }
        byte |= (self.address & 0x03) << 2;
        if self.match_value {
            byte |= 0x10;
        }
        byte
    }

    fn is_write(&self) -> bool {
        !self.read || self.match_value
    }
}

/// Number of times the whole transfer is retried after observing `WAIT`
/// before giving up (§4.F, §5).
pub const TRANSFER_RETRY_COUNT: u32 = 100;

/// A thin command layer over a [`HidDevice`], implementing the CMSIS-DAP v1
/// wire format (§4.F).
pub struct DapLink<D> {
    device: D,
    dap_index: u8,
    read_timeout: Duration,
    retry_count: u32,
}

impl<D: HidDevice> DapLink<D> {
    pub fn new(device: D) -> Self {
        DapLink { device, dap_index: 0, read_timeout: DEFAULT_READ_TIMEOUT, retry_count: TRANSFER_RETRY_COUNT }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    fn exchange(&mut self, report: &[u8]) -> Result<Vec<u8>, Error> {
        debug!("DAP write: {:02x?}", report);
        self.device.write_report(report)?;
        let response = self.device.read_report(self.read_timeout)?;
        debug!("DAP read: {:02x?}", &response[..]);
        Ok(response)
    }

    /// `DAP_Connect(port)`: selects SWD or JTAG and returns the port actually
    /// connected.
    pub fn connect(&mut self, port: Port) -> Result<Port, Error> {
        let report = [Command::Connect as u8, port as u8];
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::Connect)?;
        Ok(match response[1] {
            1 => Port::Swd,
            2 => Port::Jtag,
            _ => Port::Default,
        })
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        let report = [Command::Disconnect as u8];
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::Disconnect)
    }

    /// `DAP_SWJ_Clock(hz)`.
    pub fn swj_clock(&mut self, hz: u32) -> Result<(), Error> {
        let mut report = [0u8; 5];
        report[0] = Command::SwjClock as u8;
        report[1..5].copy_from_slice(&hz.to_le_bytes());
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::SwjClock)
    }

    /// `DAP_SWJ_Pins(output, select, wait_us)`; returns the pin state.
    pub fn swj_pins(&mut self, output: u8, select: u8, wait_us: u32) -> Result<u8, Error> {
        let mut report = [0u8; 7];
        report[0] = Command::SwjPins as u8;
        report[1] = output;
        report[2] = select;
        report[3..7].copy_from_slice(&wait_us.to_le_bytes());
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::SwjPins)?;
        Ok(response[1])
    }

    /// `DAP_SWJ_Sequence(bit_count, data)`: clocks out a raw bit sequence on
    /// SWDIO, MSB-first within each byte, used for the JTAG-to-SWD line
    /// reset and selection sequence (§4.G).
    pub fn swj_sequence(&mut self, bit_count: usize, data: &[u8]) -> Result<(), Error> {
        let mut report = Vec::with_capacity(2 + data.len());
        report.push(Command::SwjSequence as u8);
        report.push(bit_count as u8);
        report.extend_from_slice(data);
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::SwjSequence)
    }

    /// `DAP_TransferConfigure(idle_cycles, wait_retry, match_retry)`.
    pub fn transfer_configure(&mut self, idle_cycles: u8, wait_retry: u16, match_retry: u16) -> Result<(), Error> {
        let mut report = [0u8; 6];
        report[0] = Command::TransferConfigure as u8;
        report[1] = idle_cycles;
        report[2..4].copy_from_slice(&wait_retry.to_le_bytes());
        report[4..6].copy_from_slice(&match_retry.to_le_bytes());
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::TransferConfigure)
    }

    /// `DAP_WriteAbort(value)`: directly writes the DP `ABORT` register,
    /// used to clear a `FAULT` before resurfacing the error (§4.F, §7).
    pub fn write_abort(&mut self, value: u32) -> Result<(), Error> {
        let mut report = [0u8; 6];
        report[0] = Command::WriteAbort as u8;
        report[1] = self.dap_index;
        report[2..6].copy_from_slice(&value.to_le_bytes());
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::WriteAbort)
    }

    pub fn transfer_abort(&mut self) -> Result<(), Error> {
        let report = [Command::TransferAbort as u8];
        let response = self.exchange(&report)?;
        check_command_echo(response[0], Command::TransferAbort)
    }

    /// `DAP_Transfer`: packs `reqs` into a single 64-byte report and returns
    /// the values of every read request, retrying the whole transfer up to
    /// `self.retry_count` times while the first failing ack is `WAIT`
    /// (§4.F Retry policy).
    pub fn transfer(&mut self, reqs: &[TransferRequest]) -> Result<Vec<u32>, Error> {
        for attempt in 0..=self.retry_count {
            let report = encode_transfer(self.dap_index, reqs);
            let response = self.exchange(&report)?;
            check_command_echo(response[0], Command::Transfer)?;

            let count_executed = response[1] as usize;
            let ack = Ack::from_response_byte(response[2]);

            match ack {
                Ack::Ok => return Ok(decode_transfer_values(&response[3..], reqs, count_executed)),
                Ack::Wait if attempt < self.retry_count => {
                    warn!("DAP transfer WAIT, retrying (attempt {attempt})");
                    continue;
                }
                Ack::Wait => return Err(DapError::WaitExceeded.into()),
                other => {
                    self.transfer_abort().ok();
                    return Err(other.into_error().into());
                }
            }
        }
        Err(DapError::WaitExceeded.into())
    }

    /// `DAP_TransferBlock`: bulk read or write of `count` 32-bit words
    /// through a single AP register (used for `DRW` reads/writes by §4.G).
    pub fn transfer_block(&mut self, request: TransferRequest, data: &mut Vec<u32>) -> Result<(), Error> {
        for attempt in 0..=self.retry_count {
            let count = data.len() as u16;
            let mut report = Vec::with_capacity(5 + data.len() * 4);
            report.push(Command::TransferBlock as u8);
            report.push(self.dap_index);
            report.extend_from_slice(&count.to_le_bytes());
            report.push(request.descriptor_byte());
            if request.is_write() {
                for word in data.iter() {
                    report.extend_from_slice(&word.to_le_bytes());
                }
            }

            let response = self.exchange(&report)?;
            check_command_echo(response[0], Command::TransferBlock)?;

            let count_executed = u16::from_le_bytes([response[1], response[2]]);
            let ack = Ack::from_response_byte(response[3]);

            match ack {
                Ack::Ok if count_executed as usize == data.len() => {
                    if request.read {
                        let mut values = Vec::with_capacity(data.len());
                        let mut offset = 4;
                        for _ in 0..count_executed {
                            values.push(u32::from_le_bytes(
                                response[offset..offset + 4].try_into().unwrap(),
                            ));
                            offset += 4;
                        }
                        *data = values;
                    }
                    return Ok(());
                }
                Ack::Wait if attempt < self.retry_count => {
                    warn!("DAP transfer block WAIT, retrying (attempt {attempt})");
                    continue;
                }
                Ack::Wait => return Err(DapError::WaitExceeded.into()),
                Ack::Ok => return Err(DapError::ProtocolError.into()),
                other => {
                    self.transfer_abort().ok();
                    return Err(other.into_error().into());
                }
            }
        }
        Err(DapError::WaitExceeded.into())
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}

fn check_command_echo(got: u8, expected: Command) -> Result<(), Error> {
    if got != expected as u8 {
        return Err(DapError::ProtocolError.into());
    }
    Ok(())
}

/// Pack up to N requests into a single report: a 1-byte request descriptor
/// per request, followed by 4 little-endian data bytes for writes/matches
/// and nothing for reads (§4.F Transfer assembly).
fn encode_transfer(dap_index: u8, reqs: &[TransferRequest]) -> Vec<u8> {
    let mut report = Vec::with_capacity(3 + reqs.len() * 5);
    report.push(Command::Transfer as u8);
    report.push(dap_index);
    report.push(reqs.len() as u8);
    for req in reqs {
        report.push(req.descriptor_byte());
        if req.is_write() {
            report.extend_from_slice(&req.data.to_le_bytes());
        }
    }
    report
}

/// Parse `values[]` for every read request among the first `count_executed`
/// entries of `reqs` (§4.F Transfer assembly).
fn decode_transfer_values(data: &[u8], reqs: &[TransferRequest], count_executed: usize) -> Vec<u32> {
    let mut values = Vec::new();
    let mut offset = 0;
    for req in reqs.iter().take(count_executed) {
        if req.read {
            values.push(u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()));
            offset += 4;
        }
    }
    values
}
