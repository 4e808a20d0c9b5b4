use core::fmt;
use core::marker::PhantomData;

use log::error;

use serde::Serialize;

use crate::platform::{Board, Platform};

/// The cause of the most recent reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResetReason {
    /// The cause is not known.
    Unknown,
    /// Power was applied to the chip.
    PowerOn,
    /// The external reset pin was asserted.
    External,
    /// The firmware requested a restart.
    Software,
    /// The firmware crashed.
    Panic,
    /// The interrupt watchdog fired.
    InterruptWatchdog,
    /// The task watchdog fired.
    TaskWatchdog,
    /// Any other watchdog fired.
    OtherWatchdog,
    /// The chip woke up from deep sleep.
    DeepSleep,
    /// The supply voltage dropped too low.
    Brownout,
}

impl ResetReason {
    /// Decodes a vendor reset code of the `ESP32` family.
    ///
    /// Codes outside of the known set decode to [`ResetReason::Unknown`].
    #[must_use]
    pub const fn from_esp_code(code: u32) -> Self {
        match code {
            1 => Self::PowerOn,
            2 => Self::External,
            3 => Self::Software,
            4 => Self::Panic,
            5 => Self::InterruptWatchdog,
            6 => Self::TaskWatchdog,
            7 => Self::OtherWatchdog,
            8 => Self::DeepSleep,
            9 => Self::Brownout,
            _ => Self::Unknown,
        }
    }

    /// Returns the reset reason as a human-readable text.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::PowerOn => "Power-on",
            Self::External => "External",
            Self::Software => "Software",
            Self::Panic => "Panic/Crash",
            Self::InterruptWatchdog => "Interrupt watchdog",
            Self::TaskWatchdog => "Task watchdog",
            Self::OtherWatchdog => "Other watchdog",
            Self::DeepSleep => "Deep sleep",
            Self::Brownout => "Brownout",
        }
    }

    /// Checks whether the reboot followed an abnormal termination: a crash,
    /// a task watchdog or an interrupt watchdog.
    #[must_use]
    pub const fn is_abnormal(self) -> bool {
        matches!(
            self,
            Self::Panic | Self::TaskWatchdog | Self::InterruptWatchdog
        )
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// Heap statistics, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapStats {
    /// Currently free heap.
    pub free: u32,
    /// Lowest free heap since boot.
    pub min_free: u32,
    /// Largest block which can be allocated at once.
    pub max_alloc: u32,
}

impl HeapStats {
    /// Creates [`HeapStats`] for a platform which only reports the free heap.
    #[must_use]
    pub const fn free_only(free: u32) -> Self {
        Self {
            free,
            min_free: free,
            max_alloc: free,
        }
    }
}

/// Facts about the most recent reboot, as shown at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetDiagnostics {
    /// Platform reset code.
    pub reason_code: i32,
    /// Human-readable reset reason.
    pub reason_text: &'static str,
    /// Whether the reboot followed an abnormal termination.
    pub was_panic: bool,
}

/// System diagnostics of a [`Board`] running on the platform `P`.
///
/// Every value is read from the board on demand and never cached.
pub struct SystemDiagnostics<P, B> {
    board: B,
    _platform: PhantomData<P>,
}

impl<P: Platform, B: Board> SystemDiagnostics<P, B> {
    /// Creates [`SystemDiagnostics`] for a board.
    #[must_use]
    pub const fn new(board: B) -> Self {
        Self {
            board,
            _platform: PhantomData,
        }
    }

    /// Returns the underlying board.
    #[must_use]
    pub const fn board(&self) -> &B {
        &self.board
    }

    /// Returns the heap statistics.
    #[must_use]
    pub fn heap(&self) -> HeapStats {
        P::heap_stats(self.board.heap())
    }

    /// Returns the currently free heap, in bytes.
    #[must_use]
    pub fn free_heap(&self) -> u32 {
        self.heap().free
    }

    /// Returns the lowest free heap since boot, in bytes.
    #[must_use]
    pub fn min_free_heap(&self) -> u32 {
        self.heap().min_free
    }

    /// Returns the largest block which can be allocated at once, in bytes.
    #[must_use]
    pub fn max_alloc_heap(&self) -> u32 {
        self.heap().max_alloc
    }

    /// Returns the monotonic cycle counter.
    #[must_use]
    pub fn cycle_count(&self) -> u32 {
        self.board.cycle_count()
    }

    /// Returns the decoded [`ResetReason`].
    #[must_use]
    pub fn reset_reason(&self) -> ResetReason {
        P::decode_reset(self.board.raw_reset_reason())
    }

    /// Returns the platform reset code.
    #[must_use]
    pub fn reset_reason_code(&self) -> i32 {
        P::reset_code(self.board.raw_reset_reason())
    }

    /// Returns the reset reason as a human-readable text.
    #[must_use]
    pub fn reset_reason_text(&self) -> &'static str {
        P::reset_text(self.reset_reason())
    }

    /// Checks whether the board rebooted after a crash or a watchdog reset.
    #[must_use]
    pub fn was_reset_by_panic(&self) -> bool {
        self.reset_reason().is_abnormal()
    }

    /// Returns the [`ResetDiagnostics`].
    #[must_use]
    pub fn reset_diagnostics(&self) -> ResetDiagnostics {
        let raw = self.board.raw_reset_reason();
        let reason = P::decode_reset(raw);
        ResetDiagnostics {
            reason_code: P::reset_code(raw),
            reason_text: P::reset_text(reason),
            was_panic: reason.is_abnormal(),
        }
    }

    /// Restarts the board.
    pub fn restart(&self) {
        self.board.restart();
    }

    /// Busy-waits for the given number of milliseconds.
    pub fn delay_ms(&self, ms: u32) {
        self.board.delay_ms(ms);
    }
}

/// Aborts the firmware so that a crash dump is recorded.
///
/// Only platforms which persist crash dumps can abort, on every other
/// platform this function logs the message and returns.
pub fn system_abort<P: Platform, B: Board + ?Sized>(board: &B, message: &str) {
    if P::HAS_COREDUMP {
        error!("Aborting: {message}");
        board.abort(message);
    } else {
        error!("Abort requested on {}, ignored: {message}", P::NAME);
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use serde_json::json;

    use crate::platform::{Board, Esp32, Rp2040};

    use super::{HeapStats, ResetReason, SystemDiagnostics, system_abort};

    #[derive(Default)]
    struct TestBoard {
        reset: u32,
        heap: HeapStats,
        aborts: Cell<u32>,
        restarts: Cell<u32>,
    }

    impl TestBoard {
        fn with_reset(reset: u32) -> Self {
            Self {
                reset,
                ..Self::default()
            }
        }
    }

    impl Board for TestBoard {
        fn raw_reset_reason(&self) -> u32 {
            self.reset
        }

        fn heap(&self) -> HeapStats {
            self.heap
        }

        fn cycle_count(&self) -> u32 {
            42
        }

        fn restart(&self) {
            self.restarts.set(self.restarts.get() + 1);
        }

        fn delay_ms(&self, _ms: u32) {}

        fn abort(&self, _message: &str) {
            self.aborts.set(self.aborts.get() + 1);
        }
    }

    #[test]
    fn test_esp_decoding_is_total() {
        assert_eq!(ResetReason::from_esp_code(0), ResetReason::Unknown);
        assert_eq!(ResetReason::from_esp_code(4), ResetReason::Panic);
        assert_eq!(ResetReason::from_esp_code(9), ResetReason::Brownout);
        assert_eq!(ResetReason::from_esp_code(10), ResetReason::Unknown);
        assert_eq!(ResetReason::from_esp_code(u32::MAX), ResetReason::Unknown);
    }

    #[test]
    fn test_was_reset_by_panic() {
        for code in 0..=12 {
            let diagnostics = SystemDiagnostics::<Esp32, _>::new(TestBoard::with_reset(code));
            assert_eq!(
                diagnostics.was_reset_by_panic(),
                matches!(code, 4..=6),
                "reset code {code}"
            );
        }
    }

    #[test]
    fn test_esp_diagnostics() {
        let diagnostics = SystemDiagnostics::<Esp32, _>::new(TestBoard::with_reset(5));
        assert_eq!(diagnostics.reset_reason(), ResetReason::InterruptWatchdog);
        assert_eq!(diagnostics.reset_reason_code(), 5);
        assert_eq!(diagnostics.reset_reason_text(), "Interrupt watchdog");

        assert_eq!(
            serde_json::to_value(diagnostics.reset_diagnostics()).unwrap(),
            json!({
                "reasonCode": 5,
                "reasonText": "Interrupt watchdog",
                "wasPanic": true,
            })
        );
    }

    #[test]
    fn test_rp2040_collapsed_reasons() {
        let watchdog = SystemDiagnostics::<Rp2040, _>::new(TestBoard::with_reset(1));
        assert_eq!(watchdog.reset_reason_code(), 1);
        assert_eq!(watchdog.reset_reason_text(), "Watchdog");
        assert!(watchdog.was_reset_by_panic());

        let power_on = SystemDiagnostics::<Rp2040, _>::new(TestBoard::with_reset(0));
        assert_eq!(power_on.reset_reason(), ResetReason::PowerOn);
        assert_eq!(power_on.reset_reason_code(), 0);
        assert_eq!(power_on.reset_reason_text(), "Power-on");
        assert!(!power_on.was_reset_by_panic());

        // Any non-zero watchdog scratch value means a watchdog reboot.
        let other = SystemDiagnostics::<Rp2040, _>::new(TestBoard::with_reset(7));
        assert_eq!(other.reset_reason_code(), 1);
    }

    #[test]
    fn test_heap_stats() {
        let board = TestBoard {
            heap: HeapStats {
                free: 1000,
                min_free: 600,
                max_alloc: 400,
            },
            ..TestBoard::default()
        };

        let esp = SystemDiagnostics::<Esp32, _>::new(&board);
        assert_eq!(esp.min_free_heap(), 600);
        assert_eq!(esp.max_alloc_heap(), 400);
        assert_eq!(esp.cycle_count(), 42);

        let rp = SystemDiagnostics::<Rp2040, _>::new(&board);
        assert_eq!(rp.heap(), HeapStats::free_only(1000));
        assert_eq!(rp.free_heap(), 1000);
    }

    #[test]
    fn test_system_abort() {
        let board = TestBoard::default();

        system_abort::<Rp2040, _>(&board, "stuck");
        assert_eq!(board.aborts.get(), 0);

        system_abort::<Esp32, _>(&board, "stuck");
        assert_eq!(board.aborts.get(), 1);
    }

    #[test]
    fn test_restart() {
        let board = TestBoard::default();
        SystemDiagnostics::<Esp32, _>::new(&board).restart();
        assert_eq!(board.restarts.get(), 1);
    }
}
