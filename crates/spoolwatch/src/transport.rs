use alloc::string::String;

use crate::payload::Payload;

/// The path of the status stream.
pub const STATUS_EVENTS_PATH: &str = "/status_events";

/// The event name of every status frame in the stream.
pub const STATUS_EVENT_NAME: &str = "status";

/// A payload emitted by the broadcast scheduler, along with the tick time at
/// which it was emitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame<'a> {
    payload: &'a Payload,
    timestamp_ms: u64,
}

impl<'a> Frame<'a> {
    /// Creates a [`Frame`].
    #[must_use]
    pub const fn new(payload: &'a Payload, timestamp_ms: u64) -> Self {
        Self {
            payload,
            timestamp_ms,
        }
    }

    /// Returns the emitted [`Payload`].
    #[must_use]
    pub const fn payload(&self) -> &'a Payload {
        self.payload
    }

    /// Returns the emission time, in milliseconds.
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Returns the frame data sent to clients.
    ///
    /// See [`Payload::with_timestamp`].
    #[inline]
    #[must_use]
    pub fn data(&self) -> String {
        self.payload.with_timestamp(self.timestamp_ms)
    }
}

/// An event transport which delivers frames to all subscribed clients.
///
/// Publishing is best-effort and must not block: clients connect and
/// disconnect on their own, there is no acknowledgement and no per-client
/// delivery state. A frame which cannot be delivered is dropped, the
/// scheduler re-emits on its next qualifying tick.
pub trait Transport {
    /// Publishes a [`Frame`] to all currently subscribed clients.
    fn publish(&mut self, frame: &Frame<'_>);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn publish(&mut self, frame: &Frame<'_>) {
        (**self).publish(frame);
    }
}
