use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

use log::error;

use crate::status::StatusSnapshot;

/// The payload sent in place of a snapshot which could not be rendered.
pub const PLACEHOLDER: &str = "{}";

// Name of the member appended to a payload when it is framed for clients.
const TIMESTAMP_KEY: &str = "timestamp";

/// A compact `JSON` rendering of a [`StatusSnapshot`].
///
/// A payload is always a `JSON` object. It is recomputed on every tick and
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Payload(String);

impl Payload {
    /// Returns the [`PLACEHOLDER`] payload.
    #[must_use]
    pub fn placeholder() -> Self {
        Self(String::from(PLACEHOLDER))
    }

    /// Returns the payload as a [`&str`].
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks whether the payload is empty.
    ///
    /// Rendered payloads are never empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the frame body delivered to clients: the payload object with a
    /// trailing `timestamp` member, in milliseconds.
    ///
    /// The timestamp never takes part in change detection.
    #[must_use]
    pub fn with_timestamp(&self, timestamp_ms: u64) -> String {
        let body = self.0.strip_suffix('}').unwrap_or(self.0.as_str());
        let separator = if body.ends_with('{') { "" } else { "," };
        format!("{body}{separator}\"{TIMESTAMP_KEY}\":{timestamp_ms}}}")
    }

    fn from_json(bytes: Vec<u8>) -> Self {
        // `serde_json` only emits valid UTF-8.
        match String::from_utf8(bytes) {
            Ok(text) => Self(text),
            Err(e) => {
                error!("Rendered status is not valid UTF-8, using a placeholder: {e}");
                Self::placeholder()
            }
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for Payload {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Renders a [`StatusSnapshot`] into a [`Payload`].
///
/// This is a pure function: identical snapshots always render into
/// byte-identical payloads, members appear in declaration order and
/// non-finite numbers are rendered as `null`.
///
/// Rendering never fails. Should the serializer report an error, it is logged
/// and the [`PLACEHOLDER`] payload is returned.
#[must_use]
pub fn render(snapshot: &StatusSnapshot) -> Payload {
    match serde_json::to_vec(snapshot) {
        Ok(bytes) => Payload::from_json(bytes),
        Err(e) => {
            error!("Failed to render the status snapshot, using a placeholder: {e}");
            Payload::placeholder()
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use crate::parse;
    use crate::status::{PrinterStatus, StatusSnapshot};

    use super::{PLACEHOLDER, Payload, render};

    fn printing() -> StatusSnapshot {
        StatusSnapshot::new(PrinterStatus {
            is_websocket_connected: true,
            print_status: 13,
            expected_filament: 120.5,
            actual_filament: 118.25,
            current_deficit_mm: 2.25,
            movement_pulses: 4821,
            pass_ratio: 0.98,
            ratio_threshold: 0.25,
            ui_refresh_interval_ms: 1000,
            ..PrinterStatus::default()
        })
    }

    #[test]
    fn test_render_is_deterministic() {
        let snapshot = printing();
        assert_eq!(render(&snapshot), render(&snapshot));
        assert_eq!(render(&snapshot), render(&printing()));
    }

    #[test]
    fn test_render_is_compact() {
        let payload = render(&StatusSnapshot::default());
        assert!(!payload.as_str().contains(' '));
        assert!(!payload.as_str().contains('\n'));
        assert!(payload.as_str().starts_with("{\"stopped\":false,\"filamentRunout\":false"));
    }

    #[test]
    fn test_render_differs_on_change() {
        let snapshot = printing();
        let mut changed = snapshot;
        changed.printer.movement_pulses += 1;
        assert_ne!(render(&snapshot), render(&changed));
    }

    #[test]
    fn test_render_unknown_values() {
        let snapshot = StatusSnapshot::new(PrinterStatus {
            expected_filament: f32::NAN,
            pass_ratio: f32::INFINITY,
            ..PrinterStatus::default()
        });

        let payload = render(&snapshot);
        assert_eq!(render(&snapshot), payload);

        let value = parse(payload.as_str());
        assert_eq!(value["elegoo"]["expectedFilament"], Value::Null);
        assert_eq!(value["elegoo"]["passRatio"], Value::Null);
        assert_eq!(value["elegoo"]["actualFilament"], json!(0.0));
    }

    #[test]
    fn test_with_timestamp() {
        let payload = render(&printing());
        let framed = parse(&payload.with_timestamp(6200));

        assert_eq!(framed["timestamp"], json!(6200));
        assert_eq!(framed["elegoo"]["movementPulses"], json!(4821));

        let mut without_timestamp = framed;
        let _ = without_timestamp
            .as_object_mut()
            .and_then(|object| object.remove("timestamp"));
        assert_eq!(without_timestamp, parse(payload.as_str()));
    }

    #[test]
    fn test_placeholder_with_timestamp() {
        let placeholder = Payload::placeholder();
        assert_eq!(placeholder.as_str(), PLACEHOLDER);
        assert_eq!(placeholder.with_timestamp(7), "{\"timestamp\":7}");
    }

    #[cfg(feature = "deserialize")]
    #[test]
    fn test_payload_parses_back() {
        let snapshot = printing().filament_runout(true);
        let parsed: StatusSnapshot = serde_json::from_str(render(&snapshot).as_str()).unwrap();
        assert_eq!(parsed, snapshot);
    }
}
