//! RTU entry point: reads config, builds the process generator, plant logic
//! and register banks, and wires up the periodic tasks and servers.
//!
//! Task layout (all on the tokio runtime):
//! - Scan loop (1 Hz): drain injections -> snapshot coils -> generator tick
//!   -> plant tick -> publish register banks + dashboard snapshot
//! - Command logger (2 Hz): coil-edge change log for SCADA writes
//! - Modbus TCP server: coils in, discrete inputs / registers out
//! - Dashboard: HTTP + WebSocket push at 1 Hz
//! - Stdin console: interactive scenario commands
//!
//! The register map is the only state shared across tasks; everything else
//! is owned by the scan loop, which keeps the RNG stream single-threaded
//! and the trace reproducible under a fixed seed.

mod chlorine;
mod config;
mod diurnal;
mod inject;
mod modbus;
mod ou;
mod plant;
mod process;
mod rain;
mod registers;
mod state;
mod web;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use inject::{Command, ConsoleCommand};
use plant::{PlantLogic, ScanResult};
use process::{ProcessGenerator, SensorVector};
use registers::RegisterMap;
use state::{RtuState, SharedState, Snapshot};

/// PLC scan / sensor tick period.
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Coil polling period for the SCADA command change-log.
const COMMAND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Depth of the bounded operator-injection channel.
const INJECT_QUEUE: usize = 32;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Structured logging ──────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Configuration (fails fast on bad values) ────────────────────
    let cfg = config::load()?;
    info!(
        speed = cfg.speed,
        seed = ?cfg.seed,
        auto_events = cfg.auto_events,
        "simulator active"
    );

    // ── Core state ──────────────────────────────────────────────────
    let generator = ProcessGenerator::new(cfg.speed, cfg.seed, cfg.auto_events);
    let plant = PlantLogic::new();
    let registers = Arc::new(Mutex::new(RegisterMap::new()));

    let initial = Snapshot {
        sensors: SensorVector::default(),
        derived: ScanResult::default(),
        sim: generator.state_summary(),
    };
    let shared: SharedState = Arc::new(RwLock::new(RtuState::new(initial)));
    {
        let mut st = shared.write().await;
        st.record_system("rtu started".to_string());
    }

    // Bounded out-of-band channel for scenario injections (stdin + dashboard).
    let (inject_tx, inject_rx) = mpsc::channel::<Command>(INJECT_QUEUE);

    // ── Scan loop (the PLC itself, safety-critical) ─────────────────
    let mut scan_handle = {
        let registers = Arc::clone(&registers);
        let shared = Arc::clone(&shared);
        tokio::spawn(scan_loop(generator, plant, registers, shared, inject_rx))
    };

    // ── SCADA command change-log ────────────────────────────────────
    let mut command_log_handle = {
        let registers = Arc::clone(&registers);
        let shared = Arc::clone(&shared);
        tokio::spawn(command_log_loop(registers, shared))
    };

    // ── Modbus TCP server ───────────────────────────────────────────
    let mut modbus_handle = {
        let registers = Arc::clone(&registers);
        let port = cfg.modbus_port;
        tokio::spawn(async move {
            if let Err(e) = modbus::serve(registers, port).await {
                error!("modbus server error: {e:#}");
            }
        })
    };

    // ── Dashboard ───────────────────────────────────────────────────
    let mut web_handle = {
        let web_state = web::AppState {
            shared: Arc::clone(&shared),
            registers: Arc::clone(&registers),
            inject_tx: inject_tx.clone(),
        };
        let port = cfg.web_port;
        tokio::spawn(async move {
            if let Err(e) = web::serve(web_state, port).await {
                error!("web server error: {e:#}");
            }
        })
    };

    // ── Stdin console ───────────────────────────────────────────────
    // Ends quietly at EOF when the process runs detached.
    tokio::spawn(console_loop(inject_tx, Arc::clone(&shared)));

    // ── Signal handling ─────────────────────────────────────────────
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // ── Main supervision loop ───────────────────────────────────────
    let exit_reason: &str;
    loop {
        tokio::select! {
            result = &mut scan_handle => {
                error!("CRITICAL: scan loop exited unexpectedly: {result:?}");
                exit_reason = "scan loop died";
                break;
            }

            result = &mut modbus_handle => {
                error!("CRITICAL: modbus server exited unexpectedly: {result:?}");
                exit_reason = "modbus server died";
                break;
            }

            result = &mut web_handle => {
                error!("web server task exited unexpectedly: {result:?}");
                // The dashboard is not safety-critical; keep the RTU running.
                web_handle = tokio::spawn(std::future::pending());
            }

            result = &mut command_log_handle => {
                error!("command logger exited unexpectedly: {result:?}");
                command_log_handle = tokio::spawn(std::future::pending());
            }

            _ = &mut ctrl_c => {
                exit_reason = "SIGINT";
                break;
            }

            _ = sigterm.recv() => {
                exit_reason = "SIGTERM";
                break;
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────────────────
    // In-flight scans finish on their own; tasks stop when the runtime drops.
    warn!(signal = exit_reason, "shutting down");
    {
        let mut st = shared.write().await;
        st.record_system(format!("rtu stopped: {exit_reason}"));
    }
    info!("shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Scan loop
// ---------------------------------------------------------------------------

/// One iteration per second: apply queued injections, pair the latest coils
/// with a fresh sensor vector, run the plant logic, and publish the result
/// atomically (per bank) plus a dashboard snapshot.
async fn scan_loop(
    mut generator: ProcessGenerator,
    mut plant: PlantLogic,
    registers: Arc<Mutex<RegisterMap>>,
    shared: SharedState,
    mut inject_rx: mpsc::Receiver<Command>,
) {
    let mut ticker = tokio::time::interval(SCAN_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();
    let mut last_status = plant.status();

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let wall_dt = (now - last_tick).as_secs_f64();
        last_tick = now;

        // Operator injections are applied between scans, so the tick below
        // already sees them.
        let mut injected: Vec<String> = Vec::new();
        while let Ok(command) = inject_rx.try_recv() {
            match command {
                Command::SetCoil { coil, value } => {
                    let outcome = registers
                        .lock()
                        .expect("register map lock poisoned")
                        .set_coil(coil, value != 0);
                    match outcome {
                        Ok(()) => injected.push(format!("coil {coil} set {value}")),
                        Err(e) => warn!("coil write rejected: {e}"),
                    }
                }
                command => {
                    let detail = command.describe();
                    generator.inject(&command);
                    injected.push(detail);
                }
            }
        }

        let coils = registers
            .lock()
            .expect("register map lock poisoned")
            .coil_snapshot();

        let sensors = generator.tick(wall_dt, Some(&coils));
        let result = plant.tick(&sensors, coils, wall_dt);

        if !outputs_finite(&sensors, &result) {
            // The model's arithmetic is total, so this path should be
            // unreachable; keep the previous good values rather than
            // publish corrupt ones.
            error!(?sensors, ?result, "non-finite scan output dropped");
            continue;
        }

        registers
            .lock()
            .expect("register map lock poisoned")
            .apply_scan(&sensors, &result);

        let snapshot = Snapshot {
            sensors,
            derived: result,
            sim: generator.state_summary(),
        };

        let mut st = shared.write().await;
        for detail in injected {
            st.record_injection(detail);
        }
        if result.plant_status != last_status {
            st.record_status(format!(
                "plant status: {last_status} -> {}",
                result.plant_status
            ));
            last_status = result.plant_status;
        }
        st.record_scan(snapshot);
    }
}

fn outputs_finite(sensors: &SensorVector, result: &ScanResult) -> bool {
    [
        sensors.turb_raw,
        sensors.ph,
        sensors.cl2,
        sensors.flow_raw,
        sensors.level_pct,
        sensors.temp,
        result.turb_filtered,
        result.flow_treated,
        result.filter_dp,
        result.total_flow_ml,
        result.runtime_hours,
    ]
    .iter()
    .all(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// SCADA command change-log
// ---------------------------------------------------------------------------

/// Device-command coils worth logging on edges.
const COMMAND_COILS: [(usize, &str); 4] = [
    (registers::co::INTAKE_CMD, "INTAKE"),
    (registers::co::ALUM_CMD, "ALUM"),
    (registers::co::CL2_CMD, "CHLORINE"),
    (registers::co::BW_CMD, "BACKWASH"),
];

/// Poll the coil bank and log operator command edges, so coil writes from
/// any SCADA client show up in the journal and the dashboard event feed.
async fn command_log_loop(registers: Arc<Mutex<RegisterMap>>, shared: SharedState) {
    let mut prev = [false; registers::NUM_COILS];
    let mut ticker = tokio::time::interval(COMMAND_POLL_INTERVAL);

    loop {
        ticker.tick().await;
        let coils = registers
            .lock()
            .expect("register map lock poisoned")
            .coils();

        let mut changed: Vec<String> = Vec::new();
        for (idx, device) in COMMAND_COILS {
            if coils[idx] != prev[idx] {
                let on = coils[idx];
                info!(device, on, "scada command");
                changed.push(format!("{device} set {}", if on { "ON" } else { "OFF" }));
            }
        }
        prev = coils;

        if changed.is_empty() {
            continue;
        }
        let mut st = shared.write().await;
        for detail in changed {
            st.record_command(detail);
        }
    }
}

// ---------------------------------------------------------------------------
// Stdin console
// ---------------------------------------------------------------------------

async fn console_loop(inject_tx: mpsc::Sender<Command>, shared: SharedState) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("interactive commands available — type 'help' for the list");

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break, // EOF
            Err(e) => {
                debug!("stdin error: {e}");
                break;
            }
        };

        match inject::parse_console_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Help)) => println!("{}", inject::HELP),
            Ok(Some(ConsoleCommand::Status)) => {
                let sim = shared.read().await.snapshot().sim;
                println!(
                    "  Sim time: {:.0}s | Hour: {:.1} | Day: {}",
                    sim.sim_time, sim.sim_hour, sim.sim_day
                );
                println!(
                    "  Speed: {}x | Rain events: {}",
                    sim.speed, sim.active_rain_events
                );
                let faults = if sim.faults.is_empty() {
                    "none".to_string()
                } else {
                    sim.faults.join(", ")
                };
                println!(
                    "  Dosing: {} | Faults: {}",
                    if sim.dosing_active { "ON" } else { "OFF" },
                    faults
                );
            }
            Ok(Some(ConsoleCommand::Inject(command))) => {
                if inject_tx.send(command).await.is_err() {
                    break;
                }
            }
            Err(msg) => println!("{msg}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
