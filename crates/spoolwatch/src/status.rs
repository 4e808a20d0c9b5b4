use serde::Serialize;

/// The status code reported by the printer when no job is running.
pub const PRINT_STATUS_IDLE: u8 = 0;

/// Printer-side status, as reported by the printer communication module.
///
/// Floating-point fields may be non-finite while the printer has not reported
/// a value yet. They are rendered as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct PrinterStatus {
    /// Whether the printer websocket is connected.
    pub is_websocket_connected: bool,
    /// Printer protocol status code, [`PRINT_STATUS_IDLE`] when idle.
    pub print_status: u8,
    /// Filament the printer expects to have been extruded, in millimeters.
    pub expected_filament: f32,
    /// Filament measured by the sensor, in millimeters.
    pub actual_filament: f32,
    /// Current difference between expected and measured filament.
    pub current_deficit_mm: f32,
    /// Number of movement pulses counted by the sensor.
    pub movement_pulses: u32,
    /// Hard jam detector score, in percent.
    pub hard_jam_percent: f32,
    /// Soft jam detector score, in percent.
    pub soft_jam_percent: f32,
    /// Ratio between measured and expected filament.
    pub pass_ratio: f32,
    /// Ratio below which the flow is considered jammed.
    pub ratio_threshold: f32,
    /// A runout pause is scheduled but not sent yet.
    pub runout_pause_pending: bool,
    /// Filament left before the scheduled runout pause, in millimeters.
    pub runout_pause_remaining_mm: f32,
    /// A runout pause has been sent to the printer.
    pub runout_pause_commanded: bool,
    /// Refresh interval suggested to user interfaces, in milliseconds.
    pub ui_refresh_interval_ms: u32,
}

impl PrinterStatus {
    /// Checks whether the printer is running a job.
    #[must_use]
    pub const fn is_printing(&self) -> bool {
        self.print_status != PRINT_STATUS_IDLE
    }
}

/// A single consistent reading of the printer and sensor status.
///
/// A snapshot is a plain value: it is copied out of its producer and never
/// mutated by the broadcast path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// The sensor stopped the print.
    pub stopped: bool,
    /// The sensor detected a filament runout.
    pub filament_runout: bool,
    /// Printer status.
    #[serde(rename = "elegoo")]
    pub printer: PrinterStatus,
}

impl StatusSnapshot {
    /// Creates a [`StatusSnapshot`] from a [`PrinterStatus`].
    #[must_use]
    pub const fn new(printer: PrinterStatus) -> Self {
        Self {
            stopped: false,
            filament_runout: false,
            printer,
        }
    }

    /// Sets the stopped flag.
    #[must_use]
    pub const fn stopped(mut self, stopped: bool) -> Self {
        self.stopped = stopped;
        self
    }

    /// Sets the filament runout flag.
    #[must_use]
    pub const fn filament_runout(mut self, filament_runout: bool) -> Self {
        self.filament_runout = filament_runout;
        self
    }
}

/// A producer of [`StatusSnapshot`]s.
///
/// When the producer runs in another execution context, such as a timer
/// interrupt or another task, its implementation must copy the snapshot out
/// of the shared state inside a critical section.
pub trait StatusSource {
    /// Returns the current status.
    fn snapshot(&self) -> StatusSnapshot;
}

impl StatusSource for StatusSnapshot {
    fn snapshot(&self) -> StatusSnapshot {
        *self
    }
}

impl<F: Fn() -> StatusSnapshot> StatusSource for F {
    fn snapshot(&self) -> StatusSnapshot {
        self()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::to_value;

    use super::{PrinterStatus, StatusSnapshot, StatusSource};

    #[test]
    fn test_field_names() {
        let snapshot = StatusSnapshot::new(PrinterStatus {
            is_websocket_connected: true,
            print_status: 13,
            movement_pulses: 42,
            ui_refresh_interval_ms: 1000,
            ..PrinterStatus::default()
        })
        .filament_runout(true);

        let value = to_value(snapshot);
        assert_eq!(value["stopped"], json!(false));
        assert_eq!(value["filamentRunout"], json!(true));
        assert_eq!(value["elegoo"]["isWebsocketConnected"], json!(true));
        assert_eq!(value["elegoo"]["printStatus"], json!(13));
        assert_eq!(value["elegoo"]["movementPulses"], json!(42));
        assert_eq!(value["elegoo"]["uiRefreshIntervalMs"], json!(1000));
        assert_eq!(value["elegoo"]["runoutPauseCommanded"], json!(false));
    }

    #[test]
    fn test_is_printing() {
        assert!(!PrinterStatus::default().is_printing());
        assert!(
            PrinterStatus {
                print_status: 1,
                ..PrinterStatus::default()
            }
            .is_printing()
        );
    }

    #[test]
    fn test_closure_source() {
        let source = || StatusSnapshot::default().stopped(true);
        assert!(source.snapshot().stopped);
        assert_eq!(
            StatusSnapshot::default().snapshot(),
            StatusSnapshot::default()
        );
    }
}
