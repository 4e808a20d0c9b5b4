//! A hardware abstraction layer for `spoolwatch` firmware.
//!
//! The same firmware core runs on two board families with very different
//! concurrency models:
//!
//! - `ESP32` boards run a preemptive multitasking kernel on two cores, and
//!   rely on a nestable spinlock to protect shared state
//! - `RP2040` and `RP2350` boards run a cooperative loop, and protect shared
//!   state by masking interrupts
//!
//! This crate hides those differences behind a small set of interfaces:
//!
//! - [`sync`] provides critical sections, a thin scoped guard and a
//!   [`sync::Shared`] cell to exchange values with interrupt handlers and
//!   other tasks
//! - [`system`] reports why the board last reset and how much heap is left
//! - [`coredump`] gives access to the crash dump stored in flash, on the
//!   platforms which persist one
//! - [`platform`] names the selected platform and its capabilities
//!
//! The platform family is chosen at build time through exactly one of the
//! `esp32`, `rp2040` or `rp2350` features. Board-specific operations, such
//! as reading a reset register or restarting the chip, are supplied by the
//! firmware through the [`platform::Board`] trait.

#![no_std]
#![deny(missing_docs)]

#[cfg(any(test, feature = "std"))]
extern crate std;

/// Crash dump access.
pub mod coredump;
/// Error handling.
pub mod error;
/// Platform identity and board services.
pub mod platform;
/// Critical sections and shared state.
pub mod sync;
/// System diagnostics.
pub mod system;

pub use platform::{Active, PLATFORM_NAME};
pub use sync::Lock;
