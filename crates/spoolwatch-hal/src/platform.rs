use crate::sync::{CriticalSection, InterruptMask, PortMux};
use crate::system::{HeapStats, ResetReason};

#[cfg(all(feature = "esp32", feature = "rp2040"))]
compile_error!("The `esp32` and `rp2040`/`rp2350` features are mutually exclusive");

#[cfg(not(any(feature = "esp32", feature = "rp2040")))]
compile_error!("Select a platform with the `esp32`, `rp2040` or `rp2350` feature");

/// A microcontroller family.
///
/// A platform states which capabilities exist and how the raw facts reported
/// by a [`Board`] are decoded.
pub trait Platform {
    /// Platform name.
    const NAME: &'static str;
    /// Whether crash dumps are stored in flash.
    const HAS_COREDUMP: bool;
    /// Whether flash is organized in partitions.
    const HAS_PARTITION_API: bool;
    /// Whether a preemptive multitasking kernel is running.
    const HAS_RTOS: bool;

    /// The critical-section backend.
    type Lock: CriticalSection + Sync;

    /// Decodes a raw reset value into a [`ResetReason`].
    fn decode_reset(raw: u32) -> ResetReason;

    /// Returns the reset code reported to clients.
    fn reset_code(raw: u32) -> i32;

    /// Returns the text of a [`ResetReason`].
    fn reset_text(reason: ResetReason) -> &'static str {
        reason.as_str()
    }

    /// Completes the heap statistics reported by a board.
    fn heap_stats(heap: HeapStats) -> HeapStats {
        heap
    }
}

/// The `ESP32` family: two cores, a preemptive multitasking kernel and a
/// partitioned flash.
#[derive(Debug, Clone, Copy)]
pub struct Esp32;

impl Platform for Esp32 {
    const NAME: &'static str = "ESP32";
    const HAS_COREDUMP: bool = true;
    const HAS_PARTITION_API: bool = true;
    const HAS_RTOS: bool = true;

    type Lock = PortMux;

    fn decode_reset(raw: u32) -> ResetReason {
        ResetReason::from_esp_code(raw)
    }

    fn reset_code(raw: u32) -> i32 {
        i32::try_from(raw).unwrap_or(i32::MAX)
    }
}

/// The `RP2040` and `RP2350` family: a cooperative loop driven by interrupts.
///
/// The chip only tells whether the watchdog caused the last reboot, and only
/// the free heap is known.
#[derive(Debug, Clone, Copy)]
pub struct Rp2040;

impl Platform for Rp2040 {
    const NAME: &'static str = if cfg!(feature = "rp2350") {
        "RP2350"
    } else {
        "RP2040"
    };
    const HAS_COREDUMP: bool = false;
    const HAS_PARTITION_API: bool = false;
    const HAS_RTOS: bool = false;

    type Lock = InterruptMask;

    fn decode_reset(raw: u32) -> ResetReason {
        if raw != 0 {
            ResetReason::TaskWatchdog
        } else {
            ResetReason::PowerOn
        }
    }

    fn reset_code(raw: u32) -> i32 {
        i32::from(raw != 0)
    }

    fn reset_text(reason: ResetReason) -> &'static str {
        match reason {
            ResetReason::TaskWatchdog => "Watchdog",
            reason => reason.as_str(),
        }
    }

    fn heap_stats(heap: HeapStats) -> HeapStats {
        HeapStats::free_only(heap.free)
    }
}

/// The platform selected at build time.
#[cfg(feature = "esp32")]
pub type Active = Esp32;

/// The platform selected at build time.
#[cfg(all(feature = "rp2040", not(feature = "esp32")))]
pub type Active = Rp2040;

/// The name of the platform selected at build time.
pub const PLATFORM_NAME: &str = <Active as Platform>::NAME;

/// The raw services of a concrete board.
///
/// Firmware implements this trait over the vendor SDK of its board, so that
/// the rest of the crate stays platform independent.
pub trait Board {
    /// Returns the raw reset value.
    ///
    /// `ESP32` boards return the vendor reset code, `RP2040` boards return a
    /// non-zero value when the watchdog caused the last reboot.
    fn raw_reset_reason(&self) -> u32;

    /// Returns the heap statistics known to the board.
    fn heap(&self) -> HeapStats;

    /// Returns the monotonic cycle counter.
    fn cycle_count(&self) -> u32;

    /// Restarts the board.
    fn restart(&self);

    /// Busy-waits for the given number of milliseconds.
    fn delay_ms(&self, ms: u32);

    /// Aborts the firmware, recording a crash dump.
    fn abort(&self, message: &str);
}

impl<B: Board + ?Sized> Board for &B {
    fn raw_reset_reason(&self) -> u32 {
        (**self).raw_reset_reason()
    }

    fn heap(&self) -> HeapStats {
        (**self).heap()
    }

    fn cycle_count(&self) -> u32 {
        (**self).cycle_count()
    }

    fn restart(&self) {
        (**self).restart();
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms);
    }

    fn abort(&self, message: &str) {
        (**self).abort(message);
    }
}
