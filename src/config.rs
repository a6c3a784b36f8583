//! Session-level tunables (§3 `SessionConfig`, §5 Timeouts).
//!
//! A plain, host-constructible struct rather than global state: a caller
//! builds a `SessionConfig`, tweaks whatever it needs, and passes it to
//! `Programmer::open`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a programming session, with defaults matching §5's
/// Timeouts list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Blocking HID read timeout (§4.E, §5). Default 1 s.
    pub hid_read_timeout: Duration,
    /// Per-call SROM completion poll timeout (§4.H). Default 2 s.
    pub srom_poll_timeout: Duration,
    /// Deadline for the Acquire state machine (§4.H). Default 1.5 s.
    pub acquire_deadline: Duration,
    /// Number of whole-transfer retries on DAP `WAIT` (§4.F). Default 100.
    pub dap_wait_retries: u32,
    /// SWJ clock rate in Hz passed to `DAP_SWJ_Clock`.
    pub swj_clock_hz: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            hid_read_timeout: Duration::from_secs(1),
            srom_poll_timeout: Duration::from_secs(2),
            acquire_deadline: Duration::from_millis(1500),
            dap_wait_retries: 100,
            swj_clock_hz: 4_000_000,
        }
    }
}
