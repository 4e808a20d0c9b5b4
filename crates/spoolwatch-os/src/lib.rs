//! A runtime for `spoolwatch` firmware running on operating systems.
//!
//! This crate runs the firmware status-broadcast engine on a host, which is
//! useful to develop user interfaces without a board, and to exercise the
//! firmware logic end to end.
//!
//! It provides:
//!
//! - A `Server-Sent Events` transport for status frames
//! - An `HTTP` server exposing the status stream, the latest status, the
//!   system diagnostics and the stored crash dump
//! - The firmware tick task, which drives the broadcast scheduler
//! - A simulated board and an in-memory flash, standing in for the vendor
//!   SDK of a real board
//!
//! The status is produced by the caller through a [`status::SharedStatus`],
//! from any task or thread.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Simulated board services.
pub mod board;
/// Error handling.
pub mod error;
/// The `Server-Sent Events` transport.
pub mod events;
/// All responses kinds.
pub mod responses;
/// The firmware server.
pub mod server;
/// The shared status.
pub mod status;
