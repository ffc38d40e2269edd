//! Plant control logic: the scan-cycle state machine, derived process
//! values, and the packed alarm word. This is the part that runs inside the
//! PLC/RTU at a real plant.
//!
//! ## Plant status machine
//!
//! ```text
//! Offline/Shutdown ──[auto+intake, water clean]──▶ Starting ──▶ Running
//!        ▲                                                        │ │
//!        └──────[intake off, or raw turbidity over limit]─────────┘ │
//!                                                                   │
//!                        Backwash ◀──[bw_cmd]───────────────────────┘
//!                           └────[bw_cmd clears]──▶ Running
//! ```
//!
//! E-stop forces Offline from any state. The high-turbidity shutdown is
//! re-evaluated every scan and also gates the restart path, so the plant
//! cannot be brought up into dirty raw water.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::process::SensorVector;

// ---------------------------------------------------------------------------
// Alarm setpoints (configurable in a real SCADA build, fixed here)
// ---------------------------------------------------------------------------

/// Raw turbidity auto-shutdown threshold, NTU.
pub const TURB_RAW_HIGH: f64 = 500.0;
/// Raw turbidity warning level, NTU.
pub const TURB_RAW_WARN: f64 = 200.0;
/// Filtered-water turbidity alarm, NTU.
pub const TURB_FILTERED_HIGH: f64 = 1.0;
/// Minimum chlorine residual, mg/L.
pub const CL2_LOW: f64 = 0.2;
/// Maximum chlorine residual, mg/L. No alarm bit is assigned to it yet.
#[allow(dead_code)]
pub const CL2_HIGH: f64 = 4.0;
pub const PH_LOW: f64 = 6.5;
pub const PH_HIGH: f64 = 8.5;
/// Reservoir high level, %.
pub const LEVEL_HIGH: f64 = 95.0;
/// Reservoir low level, %.
pub const LEVEL_LOW: f64 = 20.0;
/// Filter differential pressure needing a backwash, kPa.
pub const FILTER_DP_HIGH: f64 = 150.0;

/// Alarm word bit assignments.
pub mod alarm {
    pub const TURB_RAW_WARN: u16 = 1 << 0;
    pub const TURB_FILTERED_HIGH: u16 = 1 << 1;
    pub const CL2_LOW: u16 = 1 << 2;
    pub const PH_HIGH: u16 = 1 << 3;
    pub const PH_LOW: u16 = 1 << 4;
    pub const LEVEL_HIGH: u16 = 1 << 5;
    pub const LEVEL_LOW: u16 = 1 << 6;
}

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Operator intent, decoded from the coil bank once per scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoilSnapshot {
    pub intake_cmd: bool,
    pub alum_cmd: bool,
    pub cl2_cmd: bool,
    pub bw_cmd: bool,
    pub auto_mode: bool,
    pub estop: bool,
    pub alarm_ack: bool,
    pub turb_shutdown_cmd: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlantStatus {
    #[default]
    Offline,
    Starting,
    Running,
    Shutdown,
    Backwash,
}

impl PlantStatus {
    /// Register encoding, reported in input register 1.
    pub fn code(self) -> u16 {
        match self {
            Self::Offline => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Shutdown => 3,
            Self::Backwash => 4,
        }
    }
}

impl fmt::Display for PlantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Backwash => write!(f, "backwash"),
        }
    }
}

/// Derived values produced by one scan.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScanResult {
    pub turb_filtered: f64,
    pub flow_treated: f64,
    pub filter_dp: f64,
    pub plant_status: PlantStatus,
    pub alarm_word: u16,
    pub backwash_count: u32,
    pub total_flow_ml: f64,
    pub runtime_hours: f64,
    pub turb_shutdown: bool,
}

// ---------------------------------------------------------------------------
// Scan-cycle logic
// ---------------------------------------------------------------------------

pub struct PlantLogic {
    status: PlantStatus,
    filter_dp: f64,
    turb_filtered: f64,
    flow_treated: f64,
    backwash_count: u32,
    total_flow_ml: f64,
    runtime_hours: f64,
    /// Set once the current backwash episode has drained the filter, so the
    /// counter increments exactly once per cycle.
    bw_complete: bool,
}

impl Default for PlantLogic {
    fn default() -> Self {
        Self::new()
    }
}

impl PlantLogic {
    pub fn new() -> Self {
        Self {
            status: PlantStatus::Offline,
            filter_dp: 0.0,
            turb_filtered: 0.0,
            flow_treated: 0.0,
            backwash_count: 0,
            total_flow_ml: 0.0,
            runtime_hours: 0.0,
            bw_complete: false,
        }
    }

    pub fn status(&self) -> PlantStatus {
        self.status
    }

    /// One scan cycle. `dt` is wall-clock seconds since the previous scan;
    /// derived values track real elapsed time, not the simulation clock.
    pub fn tick(&mut self, sensors: &SensorVector, coils: CoilSnapshot, dt: f64) -> ScanResult {
        // E-stop overrides everything.
        if coils.estop {
            if self.status != PlantStatus::Offline {
                warn!("emergency stop asserted — plant offline");
            }
            self.status = PlantStatus::Offline;
            self.turb_filtered = 0.0;
            self.flow_treated = 0.0;
            return self.result(0, false);
        }

        // High-turbidity auto-shutdown, re-evaluated every scan. The plant
        // trips out of Running and staff must restart once the water clears.
        let turb_shutdown = sensors.turb_raw > TURB_RAW_HIGH;
        if turb_shutdown && self.status == PlantStatus::Running {
            self.status = PlantStatus::Shutdown;
            warn!(
                turb_raw = sensors.turb_raw,
                limit = TURB_RAW_HIGH,
                "high turbidity shutdown"
            );
        }

        // Single status transition per scan.
        let can_start = coils.auto_mode && coils.intake_cmd && !turb_shutdown;
        let next = match self.status {
            PlantStatus::Offline | PlantStatus::Shutdown if can_start => PlantStatus::Starting,
            PlantStatus::Starting if can_start => PlantStatus::Running,
            PlantStatus::Running if !coils.intake_cmd => PlantStatus::Shutdown,
            PlantStatus::Running if coils.bw_cmd => {
                self.bw_complete = false;
                PlantStatus::Backwash
            }
            PlantStatus::Backwash if !coils.bw_cmd => PlantStatus::Running,
            other => other,
        };
        if next != self.status {
            info!(from = %self.status, to = %next, "plant status change");
            self.status = next;
        }

        match self.status {
            PlantStatus::Running => {
                // Filter removal degrades once the bed is loaded.
                let removal_efficiency = if self.filter_dp < FILTER_DP_HIGH {
                    0.98
                } else {
                    0.90
                };
                self.turb_filtered = sensors.turb_raw * (1.0 - removal_efficiency);
                // Filter loading.
                self.filter_dp += 0.1 * dt;
                // 5% of raw flow is lost to backwash/waste.
                self.flow_treated = sensors.flow_raw * 0.95;
                // Totaliser (L/s -> ML) and runtime counter.
                self.total_flow_ml += self.flow_treated * dt / 1_000_000.0;
                self.runtime_hours += dt / 3600.0;
            }
            PlantStatus::Backwash => {
                self.turb_filtered = 0.0;
                self.flow_treated = 0.0;
                self.filter_dp = (self.filter_dp - 5.0 * dt).max(0.0);
                if self.filter_dp < 5.0 && !self.bw_complete {
                    self.filter_dp = 0.0;
                    self.backwash_count += 1;
                    self.bw_complete = true;
                    info!(count = self.backwash_count, "backwash complete — filter dp reset");
                }
            }
            _ => {
                self.turb_filtered = 0.0;
                self.flow_treated = 0.0;
            }
        }

        let mut alarm_word = 0u16;
        if sensors.turb_raw > TURB_RAW_WARN {
            alarm_word |= alarm::TURB_RAW_WARN;
        }
        if self.turb_filtered > TURB_FILTERED_HIGH {
            alarm_word |= alarm::TURB_FILTERED_HIGH;
        }
        if sensors.cl2 < CL2_LOW {
            alarm_word |= alarm::CL2_LOW;
        }
        if sensors.ph > PH_HIGH {
            alarm_word |= alarm::PH_HIGH;
        }
        if sensors.ph < PH_LOW {
            alarm_word |= alarm::PH_LOW;
        }
        if sensors.level_pct > LEVEL_HIGH {
            alarm_word |= alarm::LEVEL_HIGH;
        }
        if sensors.level_pct < LEVEL_LOW {
            alarm_word |= alarm::LEVEL_LOW;
        }

        self.result(alarm_word, turb_shutdown)
    }

    fn result(&self, alarm_word: u16, turb_shutdown: bool) -> ScanResult {
        ScanResult {
            turb_filtered: self.turb_filtered,
            flow_treated: self.flow_treated,
            filter_dp: self.filter_dp,
            plant_status: self.status,
            alarm_word,
            backwash_count: self.backwash_count,
            total_flow_ml: self.total_flow_ml,
            runtime_hours: self.runtime_hours,
            turb_shutdown,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
