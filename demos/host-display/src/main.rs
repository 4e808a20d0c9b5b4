//! A simulated filament sensor.
//!
//! It runs the `spoolwatch` firmware on the host, feeds it with a fake
//! printer and streams the status to web clients on `/status_events`.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use clap::Parser;

use spoolwatch::status::{PrinterStatus, StatusSnapshot};

use spoolwatch_os::board::{MemoryFlash, SimulatedBoard};
use spoolwatch_os::error::Result;
use spoolwatch_os::server::Server;
use spoolwatch_os::status::SharedStatus;

use tokio::time;

use tracing::{Level, info, warn};

// Flash size of the simulated board.
const FLASH_CAPACITY: usize = 4 * 1024 * 1024;

// Number of printer updates in a simulated job cycle.
const CYCLE_STEPS: u32 = 60;
// Number of idle updates at the start of every cycle.
const IDLE_STEPS: u32 = 10;
// Extruded filament per update, in millimeters.
const MM_PER_STEP: f32 = 2.5;
// Sensor pulses per millimeter.
const PULSES_PER_MM: f32 = 4.0;
// Ratio below which the flow is considered jammed.
const RATIO_THRESHOLD: f32 = 0.25;
// Refresh interval suggested to user interfaces, in milliseconds.
const UI_REFRESH_INTERVAL_MS: u32 = 1000;
// Printer status code while printing.
const PRINTING: u8 = 13;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    address: IpAddr,

    /// Server port.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Heartbeat interval of the status stream, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    heartbeat_ms: u64,

    /// Interval between two firmware ticks, in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Interval between two printer updates, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    update_ms: u64,

    /// Raw reset value reported by the simulated board.
    #[arg(long, default_value_t = 1)]
    reset_code: u32,

    /// Store a crash dump in the simulated flash.
    #[arg(long)]
    crash: bool,

    /// Show debug messages.
    #[arg(short, long)]
    verbose: bool,
}

// The simulated printer status at a given update.
fn printer_at(step: u32) -> StatusSnapshot {
    let idle = PrinterStatus {
        is_websocket_connected: true,
        ratio_threshold: RATIO_THRESHOLD,
        ui_refresh_interval_ms: UI_REFRESH_INTERVAL_MS,
        ..PrinterStatus::default()
    };

    let phase = step % CYCLE_STEPS;
    if phase < IDLE_STEPS {
        return StatusSnapshot::new(idle);
    }

    let printed = (phase - IDLE_STEPS) as f32;
    // A partial jam in the middle of every job.
    let pass_ratio = if (30.0..35.0).contains(&printed) {
        0.6
    } else {
        0.98
    };

    let expected_filament = printed * MM_PER_STEP;
    let actual_filament = expected_filament * pass_ratio;

    StatusSnapshot::new(PrinterStatus {
        print_status: PRINTING,
        expected_filament,
        actual_filament,
        current_deficit_mm: expected_filament - actual_filament,
        movement_pulses: (actual_filament * PULSES_PER_MM) as u32,
        soft_jam_percent: (1.0 - pass_ratio) * 100.0,
        pass_ratio,
        ..idle
    })
}

async fn simulate_printer(status: SharedStatus, period: Duration) {
    let mut ticker = time::interval(period);
    let mut step = 0u32;

    loop {
        let _ = ticker.tick().await;
        status.publish(printer_at(step));
        step = step.wrapping_add(1);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber.
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let board = SimulatedBoard::new().reset_code(cli.reset_code);

    let mut flash = MemoryFlash::esp32(FLASH_CAPACITY);
    if cli.crash {
        match flash.store_coredump(b"simulated crash dump") {
            Ok(()) => info!("Crash dump stored in the simulated flash"),
            Err(e) => warn!("Impossible to store a crash dump: {e}"),
        }
    }

    let status = SharedStatus::new(printer_at(0));
    let _producer = tokio::spawn(simulate_printer(
        status.clone(),
        Duration::from_millis(cli.update_ms.max(1)),
    ));

    Server::new()
        .address(cli.address)
        .port(cli.port)
        .broadcast_interval(Duration::from_millis(cli.heartbeat_ms))
        .tick_interval(Duration::from_millis(cli.tick_ms))
        .run(board, flash, status, async {
            // Stop the server on Ctrl-C.
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Impossible to listen for Ctrl-C, the server never stops: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
}
