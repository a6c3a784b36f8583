//! The progress/log sink interface injected into the Programmer (§6, §9
//! Design Notes: the core holds no process-wide state — all status and
//! progress events flow out through a sink the caller supplies).

/// A thread-safe sink for status text and byte-progress events.
///
/// The UI invokes the Programmer on a background worker (§5); `log`/
/// `progress` may therefore be called from a thread other than the one
/// that called into the Programmer, so implementations must do their own
/// posting back to the GUI thread if one is involved.
pub trait ProgressSink: Send + Sync {
    fn log(&self, text: &str);
    fn progress(&self, done: u32, total: u32);
}

/// A sink that discards everything; useful as a default for callers that
/// don't care about progress (e.g. tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn log(&self, _text: &str) {}
    fn progress(&self, _done: u32, _total: u32) {}
}

/// Threshold above which progress units are downshifted by 8 bits (§6).
const DOWNSHIFT_THRESHOLD: u64 = 1 << 24;

/// Emit a progress event, downshifting `done`/`total` by 8 bits when
/// `total` exceeds 2^24 so both values fit comfortably in a `u32` (§6).
pub fn emit_progress(sink: &dyn ProgressSink, done: u64, total: u64) {
    if total > DOWNSHIFT_THRESHOLD {
        sink.progress((done >> 8) as u32, (total >> 8) as u32);
    } else {
        sink.progress(done as u32, total as u32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        last: Mutex<(u32, u32)>,
        calls: AtomicU32,
    }

    impl ProgressSink for RecordingSink {
        fn log(&self, _text: &str) {}
        fn progress(&self, done: u32, total: u32) {
            *self.last.lock().unwrap() = (done, total);
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn small_totals_pass_through_unchanged() {
        let sink = RecordingSink::default();
        emit_progress(&sink, 512, 1024);
        assert_eq!(*sink.last.lock().unwrap(), (512, 1024));
    }

    #[test]
    fn large_totals_are_downshifted_by_8_bits() {
        let sink = RecordingSink::default();
        let total = (1u64 << 24) + 1;
        emit_progress(&sink, total, total);
        let (done, total_out) = *sink.last.lock().unwrap();
        assert_eq!(done, (total >> 8) as u32);
        assert_eq!(total_out, (total >> 8) as u32);
    }
}
