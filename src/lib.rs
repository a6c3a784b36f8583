//! Host-side flash programmer for Infineon/Cypress PSoC6 microcontrollers
//! driven through a CMSIS-DAP USB-HID debug probe.
//!
//! The crate is organised leaf-first, the same way the layers are listed in
//! the system overview: firmware ingest (`hex`, `elf`, `segment`,
//! `firmware`, `memory_map`) sits below the CMSIS-DAP transport (`hid`,
//! `dap`), which sits below the SWD/DP-AP layer (`swd`), which sits below
//! the PSoC6 programming algorithms (`programmer`, `device`). `config` and
//! `progress` are the ambient collaborators the Programmer is parameterised
//! over; `error` is the crate-wide error taxonomy.

mod config;
mod dap;
mod device;
mod elf;
mod error;
mod firmware;
mod hex;
mod hid;
mod memory_map;
mod programmer;
mod progress;
mod segment;
#[cfg(test)]
mod sim;
mod swd;

pub use config::SessionConfig;
pub use device::{Ap, AcquireMode, DeviceInfo, ProtectionState, PSOC6};
pub use error::{AcquireError, DapError, Error, HidError, ParseError};
pub use firmware::FirmwareRecord;
pub use hid::ProbeInfo;
pub use memory_map::{region_of, MemoryRegion, RegionTag, PSOC6_REGIONS, PSOC6_ROW_SIZE};
pub use programmer::{scan, AcquireState, CancelFlag, Session};
pub use progress::{NullSink, ProgressSink};
pub use segment::Segment;

/// Parse a firmware image, auto-detecting Intel-HEX versus ELF32 by
/// sniffing the leading bytes, and classify/merge it into a
/// [`FirmwareRecord`] ready for programming.
///
/// HEX text always starts with `:`; anything else is handed to the ELF32
/// loader, which rejects non-ELF input with [`ParseError::NotElf`].
pub fn load_firmware(data: &[u8]) -> Result<FirmwareRecord, Error> {
    let segments = if data.first() == Some(&b':') {
        hex::parse(std::str::from_utf8(data).map_err(|_| ParseError::InvalidRecord {
            line: 0,
            reason: "firmware is not valid UTF-8 text".into(),
        })?)?
    } else {
        elf::parse(data)?
    };
    Ok(FirmwareRecord::classify(segments).merge(PSOC6_ROW_SIZE))
}

/// Re-serialize a [`FirmwareRecord`] back to Intel-HEX text, walking `order`
/// so every segment — list-valued buckets and single-valued slots alike —
/// comes out in the sequence it was originally encountered (supplements
/// §4.B; used by the HEX round-trip property and by callers that want to
/// inspect what will be programmed).
pub fn to_hex(record: &FirmwareRecord) -> String {
    let mut application_flash = record.application_flash.iter();
    let mut ecc_flash = record.ecc_flash.iter();
    let mut eeprom = record.eeprom.iter();
    let mut sflash = record.sflash.iter();
    let mut xip = record.xip.iter();

    let segments: Vec<Segment> = record
        .order
        .iter()
        .filter_map(|tag| match *tag {
            "ApplicationFlash" => application_flash.next().cloned(),
            "EccFlash" => ecc_flash.next().cloned(),
            "Eeprom" => eeprom.next().cloned(),
            "SFlash" => sflash.next().cloned(),
            "Xip" => xip.next().cloned(),
            "NvUser" => record.nv_user.clone(),
            "NvWo" => record.nv_wo.clone(),
            "Checksum" => record.checksum.clone(),
            "FlashProtection" => record.flash_protection.clone(),
            "MetaData" => record.meta_data.clone(),
            "ChipProtection" => record.chip_protection.clone(),
            "EFuse" => record.efuse.clone(),
            _ => None,
        })
        .collect();

    hex::serialize(&segments)
}
