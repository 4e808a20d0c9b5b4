use log::debug;

use crate::payload::{Payload, render};
use crate::status::{StatusSnapshot, StatusSource};
use crate::transport::{Frame, Transport};

/// Default heartbeat interval, in milliseconds.
pub const DEFAULT_BROADCAST_INTERVAL_MS: u64 = 5000;

/// Broadcast configuration.
///
/// ## Parameters
///
/// - **`interval_ms`**
///   Maximum time between two emissions of an unchanged payload.
///   Defaults to [`DEFAULT_BROADCAST_INTERVAL_MS`].
///   See [`BroadcastConfig::interval_ms()`] to configure this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    interval_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastConfig {
    /// Creates a [`BroadcastConfig`] with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval_ms: DEFAULT_BROADCAST_INTERVAL_MS,
        }
    }

    /// Sets the heartbeat interval, in milliseconds.
    #[must_use]
    pub const fn interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }
}

/// The outcome of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing has been emitted.
    Skip,
    /// The payload differs from the last emitted one, or nothing has been
    /// emitted yet. It has been emitted.
    Changed,
    /// The payload is unchanged but the heartbeat interval elapsed.
    /// It has been emitted.
    Heartbeat,
}

impl Decision {
    /// Checks whether the decision emits a payload.
    #[must_use]
    pub const fn is_emit(self) -> bool {
        !matches!(self, Self::Skip)
    }
}

/// The broadcast scheduler.
///
/// On every firmware tick, the scheduler renders the current status and emits
/// it when:
///
/// - it differs from the last emitted payload, or
/// - at least the heartbeat interval elapsed since the last emission.
///
/// When both conditions hold, a single [`Decision::Changed`] emission
/// happens. The heartbeat lets a client which reconnected, or which lost a
/// frame, catch up within one interval.
///
/// The scheduler owns its state and never queues: a frame the transport
/// cannot deliver is not retried.
#[derive(Debug, Clone)]
pub struct BroadcastScheduler {
    interval_ms: u64,
    last_broadcast_ms: Option<u64>,
    last_payload: Option<Payload>,
}

impl Default for BroadcastScheduler {
    fn default() -> Self {
        Self::new(BroadcastConfig::new())
    }
}

impl BroadcastScheduler {
    /// Creates a [`BroadcastScheduler`].
    #[must_use]
    pub const fn new(config: BroadcastConfig) -> Self {
        Self {
            interval_ms: config.interval_ms,
            last_broadcast_ms: None,
            last_payload: None,
        }
    }

    /// Returns the heartbeat interval, in milliseconds.
    #[must_use]
    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Changes the heartbeat interval.
    ///
    /// The new interval only affects future heartbeats.
    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        debug!("Broadcast interval changed to {interval_ms} ms");
        self.interval_ms = interval_ms;
    }

    /// Returns the time of the last emission, if any.
    #[must_use]
    pub const fn last_broadcast_ms(&self) -> Option<u64> {
        self.last_broadcast_ms
    }

    /// Returns the last emitted [`Payload`], if any.
    #[must_use]
    pub const fn last_payload(&self) -> Option<&Payload> {
        self.last_payload.as_ref()
    }

    /// Returns the time at which the next heartbeat is due, if anything has
    /// been emitted.
    #[must_use]
    pub const fn next_heartbeat_ms(&self) -> Option<u64> {
        match self.last_broadcast_ms {
            Some(last) => Some(last.saturating_add(self.interval_ms)),
            None => None,
        }
    }

    /// Decides whether `payload` must be emitted at `now_ms`, without changing
    /// the scheduler state.
    ///
    /// A clock that went backwards, because it wrapped or restarted, makes
    /// the heartbeat due, so the scheduler follows the new clock from its
    /// next emission.
    #[must_use]
    pub fn evaluate(&self, now_ms: u64, payload: &Payload) -> Decision {
        let (Some(last_ms), Some(last_payload)) = (self.last_broadcast_ms, &self.last_payload)
        else {
            return Decision::Changed;
        };

        if last_payload != payload {
            Decision::Changed
        } else if now_ms < last_ms || now_ms - last_ms >= self.interval_ms {
            Decision::Heartbeat
        } else {
            Decision::Skip
        }
    }

    /// Runs a tick with the given [`StatusSnapshot`].
    ///
    /// When the snapshot must be emitted, the scheduler state is updated and
    /// the frame is handed to `transport`. Otherwise nothing happens.
    pub fn tick<T: Transport + ?Sized>(
        &mut self,
        now_ms: u64,
        snapshot: &StatusSnapshot,
        transport: &mut T,
    ) -> Decision {
        self.offer(now_ms, render(snapshot), transport)
    }

    /// Runs a tick reading the snapshot from a [`StatusSource`].
    pub fn poll<S, T>(&mut self, now_ms: u64, source: &S, transport: &mut T) -> Decision
    where
        S: StatusSource + ?Sized,
        T: Transport + ?Sized,
    {
        self.tick(now_ms, &source.snapshot(), transport)
    }

    /// Runs a tick with an already rendered [`Payload`].
    pub fn offer<T: Transport + ?Sized>(
        &mut self,
        now_ms: u64,
        payload: Payload,
        transport: &mut T,
    ) -> Decision {
        let decision = self.evaluate(now_ms, &payload);
        if !decision.is_emit() {
            return decision;
        }

        debug!("Broadcasting status at {now_ms} ms: {decision:?}");

        self.last_broadcast_ms = Some(now_ms);
        let payload = self.last_payload.insert(payload);
        transport.publish(&Frame::new(payload, now_ms));

        decision
    }
}
