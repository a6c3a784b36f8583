//! HID transport: variable-length report framing and device discovery
//! (§4.E).
//!
//! This module only defines the trait boundary (`HidDevice`) and a thin
//! adapter over `hidapi`; the platform HID subsystem itself is the external
//! collaborator named in §1. Keeping the boundary as a small trait rather
//! than a concrete type lets the programmer's own test suite swap in an
//! in-memory responder without touching USB at all.

use std::time::Duration;

use crate::error::{Error, HidError};

/// Nominal size in bytes of a single CMSIS-DAP v1 HID report; commands with
/// no variable-length payload (`Connect`, `SwjPins`, ...) are always padded
/// up to this size. Bulk commands (`DAP_TransferBlock` moving a full flash
/// row) produce longer reports, so reports are otherwise carried as
/// variable-length buffers rather than fixed arrays (§4.E, §4.G).
pub const REPORT_SIZE: usize = 64;

/// Largest report this crate ever needs to exchange: one `DAP_TransferBlock`
/// response header plus one full flash row (§4.A `row_size`).
const MAX_REPORT_SIZE: usize = 1024;

/// Default timeout for a blocking HID read (§5 Timeouts).
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifying information for a discovered probe (§4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub product_string: Option<String>,
}

/// The minimal operations the rest of the crate needs from a HID device.
///
/// Only one request may be outstanding at a time; every method takes `&mut
/// self`, so the borrow checker already enforces the single-outstanding-
/// request rule from §5 without any additional synchronization.
pub trait HidDevice: Send {
    /// Write a single report, padded to at least [`REPORT_SIZE`]. Returns
    /// once the platform `write()` completes.
    fn write_report(&mut self, report: &[u8]) -> Result<(), Error>;

    /// Block for up to `timeout` for a single report.
    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, Error>;
}

/// Enumerate HID devices matching the CMSIS-DAP USB interface convention:
/// a product string containing `CMSIS-DAP`, as published host tools use.
pub fn scan() -> Result<Vec<ProbeInfo>, Error> {
    let api = hidapi::HidApi::new()?;

    let probes = api
        .device_list()
        .filter(|info| {
            info.product_string()
                .map(|s| s.contains("CMSIS-DAP"))
                .unwrap_or(false)
        })
        .map(|info| ProbeInfo {
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            serial_number: info.serial_number().map(str::to_owned),
            product_string: info.product_string().map(str::to_owned),
        })
        .collect();

    Ok(probes)
}

/// Open a probe by vendor id / product id / serial number.
pub fn open(info: &ProbeInfo) -> Result<HidApiDevice, Error> {
    let api = hidapi::HidApi::new()?;
    let device = match &info.serial_number {
        Some(serial) => api.open_serial(info.vendor_id, info.product_id, serial)?,
        None => api.open(info.vendor_id, info.product_id)?,
    };
    Ok(HidApiDevice { device })
}

/// Thin adapter over `hidapi::HidDevice` implementing [`HidDevice`] (§4.E).
pub struct HidApiDevice {
    device: hidapi::HidDevice,
}

impl HidDevice for HidApiDevice {
    fn write_report(&mut self, report: &[u8]) -> Result<(), Error> {
        let padded_len = report.len().max(REPORT_SIZE);
        let mut buf = vec![0u8; padded_len + 1];
        // report ID 0: most CMSIS-DAP probes don't use numbered reports, but
        // hidapi requires the leading byte regardless.
        buf[1..1 + report.len()].copy_from_slice(report);
        self.device.write(&buf)?;
        Ok(())
    }

    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, Error> {
        self.device.set_blocking_mode(true)?;
        let mut buf = [0u8; MAX_REPORT_SIZE];
        let read = self
            .device
            .read_timeout(&mut buf, timeout.as_millis() as i32)?;
        if read == 0 {
            return Err(Error::Hid(HidError::Timeout));
        }
        Ok(buf[..read].to_vec())
    }
}
