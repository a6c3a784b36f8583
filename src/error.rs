//! Crate-wide error taxonomy.

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by this crate.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[error("failed to parse firmware image")]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error("HID transport error")]
    #[diagnostic(transparent)]
    Hid(#[from] HidError),

    #[error("CMSIS-DAP transfer error")]
    #[diagnostic(transparent)]
    Dap(#[from] DapError),

    #[error("failed to acquire target")]
    #[diagnostic(transparent)]
    Acquire(#[from] AcquireError),

    #[error("SROM call failed with error code {0:#x}")]
    #[diagnostic(code(psoc6_flash::srom_error))]
    Srom(u32),

    #[error("verification failed at address {addr:#010x}: expected {expected:#04x}, found {actual:#04x}")]
    #[diagnostic(code(psoc6_flash::verify_mismatch))]
    VerifyMismatch { addr: u32, expected: u8, actual: u8 },

    #[error("operation was cancelled")]
    #[diagnostic(code(psoc6_flash::cancelled))]
    Cancelled,

    #[error("acquire mode `{0}` is recognised but not implemented")]
    #[diagnostic(
        code(psoc6_flash::unsupported_acquire_mode),
        help("only `AcquireMode::Reset` is currently supported")
    )]
    UnsupportedAcquireMode(&'static str),

    #[error("address {0:#010x} does not fall inside any known memory region")]
    #[diagnostic(code(psoc6_flash::unmapped_address))]
    UnmappedAddress(u32),
}

/// Errors raised while parsing an Intel-HEX or ELF32 firmware image.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("record at line {line}: checksum does not sum to zero mod 256")]
    #[diagnostic(code(psoc6_flash::hex::invalid_checksum))]
    InvalidChecksum { line: usize },

    #[error("record at line {line}: byte count does not match record length")]
    #[diagnostic(code(psoc6_flash::hex::invalid_length))]
    InvalidLength { line: usize },

    #[error("record at line {line}: {reason}")]
    #[diagnostic(code(psoc6_flash::hex::invalid_record))]
    InvalidRecord { line: usize, reason: String },

    #[error("file does not start with the ELF magic number")]
    #[diagnostic(code(psoc6_flash::elf::not_elf))]
    NotElf,

    #[error("only 32-bit ELF files (ELFCLASS32) are supported")]
    #[diagnostic(code(psoc6_flash::elf::not_elf32))]
    NotElf32,

    #[error("ELF file is truncated")]
    #[diagnostic(code(psoc6_flash::elf::truncated))]
    Truncated,
}

/// Errors raised by the HID transport layer.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum HidError {
    #[error("no matching CMSIS-DAP HID device was found")]
    #[diagnostic(code(psoc6_flash::hid::not_found))]
    NotFound,

    #[error("HID I/O error: {0}")]
    #[diagnostic(code(psoc6_flash::hid::io_error))]
    IoError(String),

    #[error("HID read timed out")]
    #[diagnostic(code(psoc6_flash::hid::timeout))]
    Timeout,
}

/// Errors raised by the CMSIS-DAP transfer sub-protocol.
#[derive(Debug, Error, Diagnostic, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DapError {
    #[error("target responded with NO_ACK")]
    #[diagnostic(code(psoc6_flash::dap::no_ack))]
    NoAck,

    #[error("target responded with FAULT")]
    #[diagnostic(code(psoc6_flash::dap::fault))]
    Fault,

    #[error("protocol error reported by the probe")]
    #[diagnostic(code(psoc6_flash::dap::protocol_error))]
    ProtocolError,

    #[error("target kept responding WAIT past the retry budget")]
    #[diagnostic(code(psoc6_flash::dap::wait_exceeded))]
    WaitExceeded,
}

/// Errors raised while bringing a target under debug control.
#[derive(Debug, Error, Diagnostic, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum AcquireError {
    #[error("acquire deadline expired before the target responded")]
    #[diagnostic(code(psoc6_flash::acquire::timeout))]
    Timeout,

    #[error("target never produced a valid SWD IDCODE")]
    #[diagnostic(code(psoc6_flash::acquire::no_swd_response))]
    NoSwdResponse,

    #[error("target did not enter test mode before the poll timeout")]
    #[diagnostic(code(psoc6_flash::acquire::test_mode_not_entered))]
    TestModeNotEntered,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::Hid(HidError::Timeout),
            std::io::ErrorKind::NotFound => Error::Hid(HidError::NotFound),
            _ => Error::Hid(HidError::IoError(err.to_string())),
        }
    }
}

impl From<hidapi::HidError> for Error {
    fn from(err: hidapi::HidError) -> Self {
        Error::Hid(HidError::IoError(err.to_string()))
    }
}
