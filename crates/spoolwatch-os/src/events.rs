use std::convert::Infallible;

use axum::response::sse::Event;

use spoolwatch::transport::{Frame, STATUS_EVENT_NAME, Transport};

use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use tracing::{trace, warn};

/// Default number of frames buffered for a slow client.
pub const DEFAULT_CAPACITY: usize = 16;

/// A `Server-Sent Events` transport.
///
/// Every published frame is handed to all connected clients. A client which
/// falls behind by more than the channel capacity skips to the newest
/// frames, and publishing without any client is not an error.
#[derive(Debug, Clone)]
pub struct SseTransport {
    sender: Sender<String>,
}

impl Default for SseTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SseTransport {
    /// Creates a [`SseTransport`] buffering up to `capacity` frames per
    /// client.
    ///
    /// A zero `capacity` is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes a new client.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<String> {
        self.sender.subscribe()
    }

    /// Returns the number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribes a new client and returns its event stream, starting with
    /// the `first` frame data.
    pub fn stream(
        &self,
        first: String,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send + use<> {
        let updates = BroadcastStream::new(self.subscribe()).filter_map(|data| match data {
            Ok(data) => Some(data),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("A status client skipped {skipped} frames");
                None
            }
        });

        tokio_stream::once(first)
            .chain(updates)
            .map(|data| Ok(status_event(&data)))
    }
}

impl Transport for SseTransport {
    fn publish(&mut self, frame: &Frame<'_>) {
        match self.sender.send(frame.data()) {
            Ok(clients) => trace!("Status frame sent to {clients} clients"),
            Err(_) => trace!("No status clients, frame dropped"),
        }
    }
}

fn status_event(data: &str) -> Event {
    Event::default().event(STATUS_EVENT_NAME).data(data)
}
