//! The status-broadcast core shared by every `spoolwatch` firmware.
//!
//! This crate provides APIs to:
//!
//! - Describe the status of a printer and its filament sensor as a single
//!   immutable snapshot
//! - Render a snapshot into a canonical, compact `JSON` payload
//! - Decide, once per firmware tick, whether a payload must be pushed to the
//!   connected clients, either because it changed or because a heartbeat is
//!   due
//! - Hand an emitted payload to an event transport, which delivers it to all
//!   subscribed clients
//!
//! The crate does not know anything about the hardware it runs on nor about
//! the network stack used to reach clients. Platform concerns live in
//! `spoolwatch-hal`, while transports are provided by the runtime crates.
//!
//! Rendering is deterministic: two snapshots with the same observable values
//! produce byte-identical payloads, which is what makes change detection a
//! plain byte comparison.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Broadcast scheduling: change detection and heartbeat.
pub mod broadcast;
/// The status serializer and its payload.
pub mod payload;
/// The status snapshot and its producer interface.
pub mod status;
/// The event transport contract.
pub mod transport;

#[cfg(test)]
pub(crate) fn to_value<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn parse(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap()
}
