//! Correlated process-sensor generation for the treatment plant.
//!
//! Each tick advances a simulated clock and composes, in dependency order:
//! mean-reverting base walks, diurnal demand/temperature curves, rain-event
//! contributions, the chlorine dosing model, a reservoir level integrator,
//! operator-injected sensor faults, and a transient glitch overlay.
//!
//! Every random draw comes from the generator's own seeded stream, and a
//! sub-step only consumes randomness when it runs, so a fixed seed plus a
//! fixed `(wall_dt, coils, injection)` schedule replays the exact trace.

use serde::Serialize;
use tracing::{debug, info};

use crate::chlorine::ChlorineModel;
use crate::diurnal::{diurnal_flow, diurnal_temp};
use crate::inject::{Command, SensorKind};
use crate::ou::{expovariate, gauss, uniform, Ou};
use crate::plant::CoilSnapshot;
use crate::rain::RainEvent;

/// Simulated start of day 0 is 06:00, so the first hours show the morning
/// demand peak.
const SIM_TIME_OFFSET: f64 = 6.0 * 3600.0;

/// Base raw-water demand and inflow in L/s.
const BASE_FLOW: f64 = 500.0;

/// Reservoir high/low level flags.
const LEVEL_HI_PCT: f64 = 95.0;
const LEVEL_LO_PCT: f64 = 20.0;

/// Glitch overlay lifetime in sim seconds.
const GLITCH_SECS: f64 = 30.0;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// One tick's worth of field instrumentation.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SensorVector {
    /// Raw-water turbidity, NTU.
    pub turb_raw: f64,
    pub ph: f64,
    /// Chlorine residual, mg/L.
    pub cl2: f64,
    /// Raw inflow, L/s.
    pub flow_raw: f64,
    /// Reservoir level, percent of span.
    pub level_pct: f64,
    /// Reservoir level in cm (30 m tank).
    pub level_cm: f64,
    /// Raw-water temperature, deg C.
    pub temp: f64,
    pub lvl_hi: bool,
    pub lvl_lo: bool,
    /// Flow-meter pulse counter.
    pub pulses: u32,
    pub p_intake: bool,
    pub p_alum: bool,
    pub p_cl2: bool,
    pub v_bw: bool,
}

/// Which sensors are currently forced into a fault.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    pub turbidity: bool,
    pub chlorine: bool,
    pub flow: bool,
}

impl Faults {
    fn set(&mut self, sensor: SensorKind, value: bool) {
        match sensor {
            SensorKind::Turbidity => self.turbidity = value,
            SensorKind::Chlorine => self.chlorine = value,
            SensorKind::Flow => self.flow = value,
        }
    }

    pub fn active(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.turbidity {
            out.push("turbidity".to_string());
        }
        if self.chlorine {
            out.push("chlorine".to_string());
        }
        if self.flow {
            out.push("flow".to_string());
        }
        out
    }
}

/// Simulation-state summary for the dashboard and the status console.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimSummary {
    pub sim_time: f64,
    pub sim_hour: f64,
    pub sim_day: u32,
    pub speed: f64,
    pub active_rain_events: usize,
    pub dosing_active: bool,
    pub faults: Vec<String>,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

pub struct ProcessGenerator {
    speed: f64,
    auto_events: bool,
    rng: fastrand::Rng,

    /// Simulated seconds since start (wall time times `speed`).
    sim_time: f64,

    turb_ou: Ou,
    ph_ou: Ou,
    /// Zero-centred offset on the diurnal demand curve.
    flow_ou: Ou,
    /// Tracks the level integrator; carries only light sensor noise.
    level_ou: Ou,
    /// Zero-centred offset on the diurnal temperature curve.
    temp_ou: Ou,

    cl2_model: ChlorineModel,
    reservoir_level: f64,

    active_events: Vec<RainEvent>,
    next_rain_time: f64,

    faults: Faults,
    glitch_until: f64,
}

impl ProcessGenerator {
    /// `speed` must already be validated (> 0); the config layer rejects
    /// anything else before construction.
    pub fn new(speed: f64, seed: Option<u64>, auto_events: bool) -> Self {
        let rng = match seed {
            Some(s) => fastrand::Rng::with_seed(s),
            None => fastrand::Rng::new(),
        };

        let mut gen = Self {
            speed,
            auto_events,
            rng,
            sim_time: 0.0,
            turb_ou: Ou::new(3.5, 0.4, 0.001, 3.5),
            ph_ou: Ou::new(7.2, 0.03, 0.005, 7.2),
            flow_ou: Ou::new(0.0, 15.0, 0.01, 0.0),
            level_ou: Ou::new(65.0, 0.05, 0.1, 65.0),
            temp_ou: Ou::new(0.0, 0.1, 0.01, 0.0),
            cl2_model: ChlorineModel::default(),
            reservoir_level: 65.0,
            active_events: Vec::new(),
            next_rain_time: f64::INFINITY,
            faults: Faults::default(),
            glitch_until: 0.0,
        };
        gen.next_rain_time = gen.schedule_next_rain();
        gen
    }

    /// Poisson scheduling with a mean interval of 18-36 simulated hours.
    fn schedule_next_rain(&mut self) -> f64 {
        if !self.auto_events {
            return f64::INFINITY;
        }
        let mean_interval = uniform(&mut self.rng, 18.0, 36.0) * 3600.0;
        self.sim_time + expovariate(&mut self.rng, mean_interval)
    }

    /// Apply a scenario command. `SetCoil` is not a generator concern and is
    /// routed to the register map upstream.
    pub fn inject(&mut self, command: &Command) {
        match *command {
            Command::Rain {
                peak,
                duration_hours,
            } => {
                self.active_events
                    .push(RainEvent::new(self.sim_time, peak, duration_hours));
                info!(
                    peak_ntu = peak,
                    duration_h = duration_hours,
                    "rain event injected"
                );
            }
            Command::DoseOff => {
                self.cl2_model.dosing_active = false;
                info!("chlorine dosing disabled");
            }
            Command::DoseOn => {
                self.cl2_model.dosing_active = true;
                info!("chlorine dosing enabled");
            }
            Command::Fault { sensor } => {
                self.faults.set(sensor, true);
                info!(%sensor, "sensor fault injected");
            }
            Command::Clear { sensor } => {
                self.faults.set(sensor, false);
                info!(%sensor, "sensor fault cleared");
            }
            Command::Glitch => {
                self.glitch_until = self.sim_time + GLITCH_SECS;
                info!("data glitch injected (30 sim-seconds)");
            }
            Command::SetCoil { coil, value } => {
                debug!(coil, value, "set_coil is handled by the register map");
            }
        }
    }

    /// Advance the simulation by `wall_dt` wall seconds (scaled by `speed`)
    /// and produce the sensor vector. Without a coil snapshot the plant is
    /// assumed running (intake/alum/cl2 on, backwash valve closed).
    pub fn tick(&mut self, wall_dt: f64, coils: Option<&CoilSnapshot>) -> SensorVector {
        let sim_dt = wall_dt * self.speed;
        self.sim_time += sim_dt;

        let total_sim_seconds = self.sim_time + SIM_TIME_OFFSET;
        let hour_of_day = (total_sim_seconds / 3600.0) % 24.0;

        // -- Auto rain scheduler ------------------------------------------
        if self.auto_events && self.sim_time >= self.next_rain_time {
            let peak = uniform(&mut self.rng, 200.0, 800.0);
            let duration = uniform(&mut self.rng, 3.0, 10.0);
            self.inject(&Command::Rain {
                peak,
                duration_hours: duration,
            });
            self.next_rain_time = self.schedule_next_rain();
        }

        // Prune expired events before contributions are summed.
        let sim_time = self.sim_time;
        self.active_events.retain(|e| !e.is_expired(sim_time));
        let any_rain = self.active_events.iter().any(|e| e.is_active(sim_time));

        // -- Turbidity: slow OU walk around 2-5 NTU plus rain spikes ------
        self.turb_ou.step(sim_dt, &mut self.rng);
        let turb_base = self.turb_ou.x.max(0.5);
        let turb_rain: f64 = self
            .active_events
            .iter()
            .map(|e| e.turbidity_contribution(sim_time))
            .sum();
        let mut turb_raw = turb_base + turb_rain;
        let turb_noise = gauss(&mut self.rng, 0.0, (turb_raw * 0.02).max(0.3));
        turb_raw = (turb_raw + turb_noise).max(0.0);
        if self.faults.turbidity {
            turb_raw = uniform(&mut self.rng, 900.0, 999.0);
        }

        // -- pH: diurnal drift around 7.0-7.4, pulled down by runoff ------
        let ph_diurnal = 7.2 + 0.2 * (std::f64::consts::TAU * hour_of_day / 24.0).sin();
        self.ph_ou.set_mu(ph_diurnal);
        self.ph_ou.step(sim_dt, &mut self.rng);
        let mut ph = self.ph_ou.x
            + self
                .active_events
                .iter()
                .map(|e| e.ph_contribution(sim_time))
                .sum::<f64>();
        ph = ph.clamp(4.0, 10.0);

        // -- Chlorine ------------------------------------------------------
        let mut cl2 = self.cl2_model.step(sim_dt, any_rain, &mut self.rng);
        if self.faults.chlorine {
            // Dosing pump failure: residual collapses.
            cl2 = (cl2 - 1.5).max(0.0);
        }

        // -- Flow: diurnal demand plus rain boost -------------------------
        let base_flow = diurnal_flow(hour_of_day, BASE_FLOW);
        self.flow_ou.step(sim_dt, &mut self.rng);
        let mut flow_raw = base_flow + self.flow_ou.x;
        flow_raw += self
            .active_events
            .iter()
            .map(|e| e.flow_contribution(sim_time, base_flow))
            .sum::<f64>();
        flow_raw += gauss(&mut self.rng, 0.0, flow_raw * 0.03);
        flow_raw = flow_raw.max(0.0);
        if self.faults.flow {
            flow_raw = 0.0;
        }

        // -- Reservoir level integrator -----------------------------------
        // Inflow raises the level, consumer demand drains it. With the
        // intake pump off the reservoir drains at ~3.6% per simulated hour
        // at base demand.
        let intake_running = coils.map_or(true, |c| c.intake_cmd);
        let inflow = if intake_running { flow_raw } else { 0.0 };
        let demand = diurnal_flow(hour_of_day, BASE_FLOW);
        let net_flow_pct_per_sec = (inflow - demand) / BASE_FLOW * (3.6 / 3600.0);
        self.reservoir_level =
            (self.reservoir_level + net_flow_pct_per_sec * sim_dt).clamp(0.0, 100.0);
        // Light sensor noise around the integrated level; the OU state is
        // then re-pinned to the reading so it never fights the integrator.
        self.level_ou.set_mu(self.reservoir_level);
        self.level_ou.step(sim_dt, &mut self.rng);
        let level_pct = self.level_ou.x.clamp(0.0, 100.0);
        self.level_ou.x = level_pct;
        self.reservoir_level = level_pct;
        let level_cm = level_pct * 30.0;

        // -- Temperature ---------------------------------------------------
        let temp_base = diurnal_temp(hour_of_day, 22.0, 28.0);
        self.temp_ou.step(sim_dt, &mut self.rng);
        let mut temp = temp_base + self.temp_ou.x;
        temp += self
            .active_events
            .iter()
            .map(|e| e.temp_contribution(sim_time))
            .sum::<f64>();
        temp = temp.clamp(10.0, 45.0);

        // -- Transient glitch overlay -------------------------------------
        if self.sim_time < self.glitch_until {
            turb_raw = (turb_raw + uniform(&mut self.rng, -50.0, 200.0)).max(0.0);
            ph = (ph + uniform(&mut self.rng, -2.0, 2.0)).clamp(0.0, 14.0);
            flow_raw = (flow_raw + uniform(&mut self.rng, -200.0, 200.0)).max(0.0);
        }

        // -- Digital derivations ------------------------------------------
        let (p_intake, p_alum, p_cl2, v_bw) = match coils {
            Some(c) => (c.intake_cmd, c.alum_cmd, c.cl2_cmd, c.bw_cmd),
            None => (true, true, true, false),
        };

        SensorVector {
            turb_raw,
            ph,
            cl2,
            flow_raw,
            level_pct,
            level_cm,
            temp,
            lvl_hi: level_pct > LEVEL_HI_PCT,
            lvl_lo: level_pct < LEVEL_LO_PCT,
            pulses: (flow_raw * 0.02) as u32,
            p_intake,
            p_alum,
            p_cl2,
            v_bw,
        }
    }

    pub fn state_summary(&self) -> SimSummary {
        let total_sim_seconds = self.sim_time + SIM_TIME_OFFSET;
        SimSummary {
            sim_time: self.sim_time,
            sim_hour: (total_sim_seconds / 3600.0) % 24.0,
            sim_day: (total_sim_seconds / 86_400.0) as u32,
            speed: self.speed,
            active_rain_events: self
                .active_events
                .iter()
                .filter(|e| e.is_active(self.sim_time))
                .count(),
            dosing_active: self.cl2_model.dosing_active,
            faults: self.faults.active(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn running_coils() -> CoilSnapshot {
        CoilSnapshot {
            intake_cmd: true,
            alum_cmd: true,
            cl2_cmd: true,
            auto_mode: true,
            ..CoilSnapshot::default()
        }
    }

    // -- Physical invariants ------------------------------------------------

    #[test]
    fn signals_stay_in_physical_range() {
        let mut gen = ProcessGenerator::new(60.0, Some(42), true);
        for _ in 0..5000 {
            let sv = gen.tick(1.0, None);
            assert!(sv.turb_raw >= 0.0, "turb {}", sv.turb_raw);
            assert!((4.0..=10.0).contains(&sv.ph), "ph {}", sv.ph);
            assert!((0.0..=5.0).contains(&sv.cl2), "cl2 {}", sv.cl2);
            assert!(sv.flow_raw >= 0.0, "flow {}", sv.flow_raw);
            assert!((0.0..=100.0).contains(&sv.level_pct), "level {}", sv.level_pct);
            assert!((10.0..=45.0).contains(&sv.temp), "temp {}", sv.temp);
            assert_eq!(sv.level_cm, sv.level_pct * 30.0);
        }
    }

    #[test]
    fn pulses_track_flow() {
        let mut gen = ProcessGenerator::new(1.0, Some(1), false);
        for _ in 0..50 {
            let sv = gen.tick(1.0, None);
            assert_eq!(sv.pulses, (sv.flow_raw * 0.02) as u32);
        }
    }

    // -- Reproducibility ----------------------------------------------------

    #[test]
    fn equal_seeds_replay_the_same_trace() {
        let mut a = ProcessGenerator::new(60.0, Some(7), true);
        let mut b = ProcessGenerator::new(60.0, Some(7), true);
        let coils = running_coils();
        for i in 0..2000 {
            if i == 500 {
                let cmd = Command::Rain {
                    peak: 600.0,
                    duration_hours: 4.0,
                };
                a.inject(&cmd);
                b.inject(&cmd);
            }
            assert_eq!(a.tick(1.0, Some(&coils)), b.tick(1.0, Some(&coils)));
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = ProcessGenerator::new(1.0, Some(1), false);
        let mut b = ProcessGenerator::new(1.0, Some(2), false);
        let mut diverged = false;
        for _ in 0..20 {
            if a.tick(1.0, None) != b.tick(1.0, None) {
                diverged = true;
                break;
            }
        }
        assert!(diverged);
    }

    // -- Coil handling ------------------------------------------------------

    #[test]
    fn no_coils_defaults_to_plant_running() {
        let mut gen = ProcessGenerator::new(1.0, Some(3), false);
        let sv = gen.tick(1.0, None);
        assert!(sv.p_intake && sv.p_alum && sv.p_cl2);
        assert!(!sv.v_bw);
    }

    #[test]
    fn coil_bits_are_echoed() {
        let mut gen = ProcessGenerator::new(1.0, Some(3), false);
        let coils = CoilSnapshot {
            intake_cmd: false,
            alum_cmd: true,
            cl2_cmd: false,
            bw_cmd: true,
            ..CoilSnapshot::default()
        };
        let sv = gen.tick(1.0, Some(&coils));
        assert!(!sv.p_intake);
        assert!(sv.p_alum);
        assert!(!sv.p_cl2);
        assert!(sv.v_bw);
    }

    #[test]
    fn intake_off_drains_the_reservoir() {
        // One simulated day with the intake pump off: demand keeps drawing,
        // the level must fall well below the 65% start and eventually trip
        // the low flag.
        let mut gen = ProcessGenerator::new(3600.0, Some(5), false);
        let coils = CoilSnapshot::default(); // everything off
        let mut last = 0.0;
        for _ in 0..24 {
            last = gen.tick(1.0, Some(&coils)).level_pct;
        }
        assert!(last < 20.0, "level should have drained: {last}");
        let sv = gen.tick(1.0, Some(&coils));
        assert!(sv.lvl_lo);
        assert!(!sv.lvl_hi);
    }

    // -- Faults -------------------------------------------------------------

    #[test]
    fn flow_fault_zeroes_the_meter() {
        let mut gen = ProcessGenerator::new(1.0, Some(9), false);
        gen.inject(&Command::Fault {
            sensor: SensorKind::Flow,
        });
        for _ in 0..10 {
            let sv = gen.tick(1.0, None);
            assert_eq!(sv.flow_raw, 0.0);
            assert_eq!(sv.pulses, 0);
        }
    }

    #[test]
    fn turbidity_fault_pins_the_reading_high() {
        let mut gen = ProcessGenerator::new(1.0, Some(9), false);
        gen.inject(&Command::Fault {
            sensor: SensorKind::Turbidity,
        });
        for _ in 0..10 {
            let sv = gen.tick(1.0, None);
            assert!((900.0..999.0).contains(&sv.turb_raw), "turb {}", sv.turb_raw);
        }
    }

    #[test]
    fn chlorine_fault_drops_residual_by_pump_loss() {
        let mut clean = ProcessGenerator::new(1.0, Some(13), false);
        let mut faulty = ProcessGenerator::new(1.0, Some(13), false);
        faulty.inject(&Command::Fault {
            sensor: SensorKind::Chlorine,
        });
        for _ in 0..100 {
            let c = clean.tick(1.0, None);
            let f = faulty.tick(1.0, None);
            assert_eq!(f.cl2, (c.cl2 - 1.5).max(0.0));
        }
    }

    #[test]
    fn clear_restores_a_faulted_sensor() {
        let mut gen = ProcessGenerator::new(1.0, Some(9), false);
        gen.inject(&Command::Fault {
            sensor: SensorKind::Flow,
        });
        gen.tick(1.0, None);
        gen.inject(&Command::Clear {
            sensor: SensorKind::Flow,
        });
        let sv = gen.tick(1.0, None);
        assert!(sv.flow_raw > 0.0);
    }

    // -- Rain ---------------------------------------------------------------

    #[test]
    fn injected_rain_pushes_turbidity_over_the_shutdown_line() {
        let mut gen = ProcessGenerator::new(60.0, Some(21), false);
        gen.inject(&Command::Rain {
            peak: 900.0,
            duration_hours: 6.0,
        });
        // rise_time is 36 sim-minutes; at speed 60 that is 36 wall ticks.
        let mut max_turb: f64 = 0.0;
        for _ in 0..40 {
            max_turb = max_turb.max(gen.tick(1.0, None).turb_raw);
        }
        assert!(max_turb > 500.0, "rain peak never crossed 500: {max_turb}");
        assert_eq!(gen.state_summary().active_rain_events, 1);
    }

    #[test]
    fn expired_events_are_pruned() {
        let mut gen = ProcessGenerator::new(3600.0, Some(21), false);
        gen.inject(&Command::Rain {
            peak: 400.0,
            duration_hours: 2.0,
        });
        assert_eq!(gen.state_summary().active_rain_events, 1);
        for _ in 0..3 {
            gen.tick(1.0, None);
        }
        assert_eq!(gen.state_summary().active_rain_events, 0);
    }

    #[test]
    fn auto_events_disabled_means_no_spontaneous_rain() {
        let mut gen = ProcessGenerator::new(3600.0, Some(33), false);
        for _ in 0..1000 {
            gen.tick(1.0, None);
        }
        assert_eq!(gen.state_summary().active_rain_events, 0);
    }

    // -- Glitch -------------------------------------------------------------

    #[test]
    fn glitch_disturbs_then_settles() {
        let mut gen = ProcessGenerator::new(1.0, Some(17), false);
        // Establish the quiet envelope.
        let mut baseline_max: f64 = 0.0;
        for _ in 0..50 {
            baseline_max = baseline_max.max(gen.tick(1.0, None).turb_raw);
        }

        gen.inject(&Command::Glitch);
        let mut glitch_max: f64 = 0.0;
        for _ in 0..30 {
            glitch_max = glitch_max.max(gen.tick(1.0, None).turb_raw);
        }
        assert!(
            glitch_max > baseline_max + 50.0,
            "glitch should break the envelope: {glitch_max} vs {baseline_max}"
        );

        // After the window the signal returns to the quiet envelope.
        let mut after_max: f64 = 0.0;
        for _ in 0..50 {
            after_max = after_max.max(gen.tick(1.0, None).turb_raw);
        }
        assert!(after_max < baseline_max + 50.0, "glitch did not expire: {after_max}");
    }

    // -- Clock --------------------------------------------------------------

    #[test]
    fn simulated_clock_starts_at_0600_and_advances() {
        let mut gen = ProcessGenerator::new(60.0, Some(1), false);
        let start = gen.state_summary();
        assert_eq!(start.sim_hour, 6.0);
        assert_eq!(start.sim_day, 0);

        // 60 wall ticks at speed 60 = one simulated hour.
        for _ in 0..60 {
            gen.tick(1.0, None);
        }
        let later = gen.state_summary();
        assert!((later.sim_hour - 7.0).abs() < 1e-9, "hour {}", later.sim_hour);

        // 18 more simulated hours roll into day 1.
        for _ in 0..(18 * 60) {
            gen.tick(1.0, None);
        }
        assert_eq!(gen.state_summary().sim_day, 1);
    }

    #[test]
    fn summary_reports_dosing_and_faults() {
        let mut gen = ProcessGenerator::new(1.0, Some(1), false);
        assert!(gen.state_summary().dosing_active);
        assert!(gen.state_summary().faults.is_empty());

        gen.inject(&Command::DoseOff);
        gen.inject(&Command::Fault {
            sensor: SensorKind::Flow,
        });
        let summary = gen.state_summary();
        assert!(!summary.dosing_active);
        assert_eq!(summary.faults, vec!["flow".to_string()]);
    }
}
