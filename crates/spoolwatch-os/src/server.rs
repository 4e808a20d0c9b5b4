use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Json, State},
    http::{StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::get,
};

use spoolwatch::broadcast::{BroadcastConfig, BroadcastScheduler};
use spoolwatch::payload::render;
use spoolwatch::status::{StatusSnapshot, StatusSource};
use spoolwatch::transport::STATUS_EVENTS_PATH;

use spoolwatch_hal::coredump::{CoreDump, CoreDumpAccessor, Flash};
use spoolwatch_hal::platform::{Active, Board, PLATFORM_NAME, Platform};
use spoolwatch_hal::system::{ResetDiagnostics, SystemDiagnostics};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};

use tower_http::trace::TraceLayer;

use tracing::{debug, info};

use crate::error::Error;
use crate::events::SseTransport;
use crate::responses::{CoreDumpInfo, DiagnosticsResponse, ErrorResponse, VersionResponse};
use crate::status::SharedStatus;

// Default server address.
const DEFAULT_SERVER_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

// Default port.
const DEFAULT_SERVER_PORT: u16 = 80;

// Default firmware tick interval.
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// The path of the latest status.
pub const SENSOR_STATUS_PATH: &str = "/sensor_status";

/// The path of the system diagnostics.
pub const DIAGNOSTICS_PATH: &str = "/diagnostics";

/// The path of the stored crash dump.
pub const COREDUMP_PATH: &str = "/coredump";

/// The path of the firmware version.
pub const VERSION_PATH: &str = "/version";

type SharedCoreDump = Arc<Mutex<Box<dyn CoreDump + Send>>>;

#[derive(Clone)]
struct ServerState {
    status: SharedStatus,
    events: SseTransport,
    board: Arc<dyn Board + Send + Sync>,
    coredump: SharedCoreDump,
    boot: Instant,
    firmware_version: &'static str,
}

impl ServerState {
    fn uptime_ms(&self) -> u64 {
        u64::try_from(self.boot.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn diagnostics(&self) -> SystemDiagnostics<Active, &(dyn Board + Send + Sync)> {
        SystemDiagnostics::new(&*self.board)
    }
}

/// The firmware server.
///
/// It exposes the status stream and the maintenance routes, and drives the
/// broadcast scheduler from its firmware tick task.
#[derive(Debug, Clone, Copy)]
pub struct Server {
    // Server address.
    address: IpAddr,
    // Server port.
    port: u16,
    // Broadcast configuration.
    broadcast: BroadcastConfig,
    // Interval between two firmware ticks.
    tick_interval: Duration,
    // Firmware version.
    firmware_version: &'static str,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Creates a [`Server`].
    ///
    /// **The default port is 80, and the default heartbeat interval is
    /// 5 seconds.**
    #[must_use]
    pub const fn new() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS,
            port: DEFAULT_SERVER_PORT,
            broadcast: BroadcastConfig::new(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            firmware_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Sets the server address.
    #[must_use]
    pub const fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Sets the server port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the heartbeat interval of the status stream.
    ///
    /// Sub-millisecond precision is discarded, and intervals beyond
    /// `u64::MAX` milliseconds saturate.
    #[must_use]
    pub const fn broadcast_interval(mut self, interval: Duration) -> Self {
        let millis = interval.as_millis();
        let interval_ms = if millis > u64::MAX as u128 {
            u64::MAX
        } else {
            millis as u64
        };
        self.broadcast = self.broadcast.interval_ms(interval_ms);
        self
    }

    /// Sets the interval between two firmware ticks.
    #[must_use]
    pub const fn tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    /// Sets the firmware version.
    #[must_use]
    pub const fn firmware_version(mut self, firmware_version: &'static str) -> Self {
        self.firmware_version = firmware_version;
        self
    }

    /// Runs the server until `shutdown` completes.
    ///
    /// The crash dump is read from `flash` on platforms which store one.
    ///
    /// # Errors
    ///
    /// - The tick interval is zero
    /// - Failure to bind the server address
    /// - Failure while serving clients
    pub async fn run<B, F, S>(
        self,
        board: B,
        flash: F,
        status: SharedStatus,
        shutdown: S,
    ) -> crate::error::Result<()>
    where
        B: Board + Send + Sync + 'static,
        F: Flash + Send + 'static,
        S: Future<Output = ()> + Send + 'static,
    {
        if self.tick_interval.is_zero() {
            return Err(Error::ZeroTickInterval);
        }

        let state = self.state(board, flash, status);

        let reset = state.diagnostics().reset_diagnostics();
        log_boot(&reset);

        let ticker = tokio::spawn(tick_task(
            BroadcastScheduler::new(self.broadcast),
            state.clone(),
            self.tick_interval,
        ));

        let listener = TcpListener::bind(SocketAddr::new(self.address, self.port)).await?;
        info!(
            "Serving the status stream on http://{}{STATUS_EVENTS_PATH}",
            listener.local_addr()?
        );

        let served = axum::serve(listener, router(state))
            .with_graceful_shutdown(shutdown)
            .await;

        ticker.abort();
        info!("Server stopped");

        served.map_err(Error::from)
    }

    fn state<B, F>(&self, board: B, flash: F, status: SharedStatus) -> ServerState
    where
        B: Board + Send + Sync + 'static,
        F: Flash + Send + 'static,
    {
        let coredump: Box<dyn CoreDump + Send> =
            Box::new(CoreDumpAccessor::new::<Active>(flash));

        ServerState {
            status,
            events: SseTransport::default(),
            board: Arc::new(board),
            coredump: Arc::new(Mutex::new(coredump)),
            boot: Instant::now(),
            firmware_version: self.firmware_version,
        }
    }
}

fn log_boot(reset: &ResetDiagnostics) {
    info!(
        "Running on {PLATFORM_NAME}, reset reason: {} ({})",
        reset.reason_text, reset.reason_code
    );
    if reset.was_panic {
        info!("The previous run ended abnormally, check {COREDUMP_PATH} for a crash dump");
    }
}

fn router(state: ServerState) -> Router {
    Router::new()
        .route(STATUS_EVENTS_PATH, get(status_events))
        .route(SENSOR_STATUS_PATH, get(sensor_status))
        .route(DIAGNOSTICS_PATH, get(diagnostics))
        .route(COREDUMP_PATH, get(coredump).delete(erase_coredump))
        .route(VERSION_PATH, get(version))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn tick_task(
    mut scheduler: BroadcastScheduler,
    mut state: ServerState,
    tick_interval: Duration,
) {
    let mut ticker = time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let _ = ticker.tick().await;

        let now_ms = state.uptime_ms();
        let decision = scheduler.poll(now_ms, &state.status, &mut state.events);
        if decision.is_emit() {
            debug!(
                "{decision:?} status frame at {now_ms} ms for {} clients",
                state.events.client_count()
            );
        }
    }
}

async fn status_events(State(state): State<ServerState>) -> impl IntoResponse {
    // A new client immediately receives the current status.
    let current = render(&state.status.snapshot()).with_timestamp(state.uptime_ms());
    debug!("New status client");

    Sse::new(state.events.stream(current)).keep_alive(KeepAlive::default())
}

async fn sensor_status(State(state): State<ServerState>) -> Json<StatusSnapshot> {
    Json(state.status.snapshot())
}

async fn diagnostics(State(state): State<ServerState>) -> Json<DiagnosticsResponse> {
    let coredump = {
        let mut coredump = state.coredump.lock().await;
        let size = match coredump.locate() {
            Some(partition) => coredump.image_size(&partition),
            None => 0,
        };
        CoreDumpInfo {
            available: size > 0,
            size,
        }
    };

    let diagnostics = state.diagnostics();
    Json(DiagnosticsResponse {
        platform: PLATFORM_NAME,
        has_rtos: <Active as Platform>::HAS_RTOS,
        reset: diagnostics.reset_diagnostics(),
        heap: diagnostics.heap(),
        cycle_count: diagnostics.cycle_count(),
        coredump,
    })
}

async fn coredump(State(state): State<ServerState>) -> Result<Response, ErrorResponse> {
    let mut coredump = state.coredump.lock().await;

    let partition = coredump
        .locate()
        .ok_or_else(|| ErrorResponse::not_found("No crash dump partition"))?;

    let size = coredump.image_size(&partition);
    if size == 0 {
        return Err(ErrorResponse::not_found("No crash dump stored"));
    }

    let mut image = vec![0; size];
    coredump
        .read(&partition, 0, &mut image)
        .map_err(|e| ErrorResponse::hal("Failed to read the crash dump", e))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"coredump.bin\"",
            ),
        ],
        image,
    )
        .into_response())
}

async fn erase_coredump(State(state): State<ServerState>) -> Result<StatusCode, ErrorResponse> {
    let mut coredump = state.coredump.lock().await;

    let partition = coredump
        .locate()
        .ok_or_else(|| ErrorResponse::not_found("No crash dump partition"))?;

    coredump
        .erase(&partition)
        .map_err(|e| ErrorResponse::hal("Failed to erase the crash dump", e))?;

    info!("Crash dump erased");
    Ok(StatusCode::NO_CONTENT)
}

async fn version(State(state): State<ServerState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        firmware_version: state.firmware_version,
        build_version: env!("CARGO_PKG_VERSION"),
        chip_family: PLATFORM_NAME,
    })
}
