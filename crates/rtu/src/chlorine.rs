//! Chlorine residual model: periodic dosing pulse plus exponential decay,
//! giving the sawtooth-ish trace a real contact tank shows. Decay doubles
//! during rain because the extra organics consume chlorine.

use crate::ou::gauss;

/// Seconds between dosing pulses.
const DOSE_INTERVAL: f64 = 900.0;

/// Base first-order decay rate per second.
const DECAY_RATE: f64 = 3.0e-4;

#[derive(Debug, Clone)]
pub struct ChlorineModel {
    /// Residual in mg/L, held in [0, 5].
    pub residual: f64,
    pub dosing_active: bool,
    time_since_dose: f64,
}

impl Default for ChlorineModel {
    fn default() -> Self {
        Self {
            residual: 1.5,
            dosing_active: true,
            time_since_dose: 0.0,
        }
    }
}

impl ChlorineModel {
    /// Advance the residual by `dt` sim seconds and return it.
    ///
    /// With dosing disabled only the (doubled) decay applies and no
    /// randomness is consumed, so the residual converges monotonically to
    /// zero with no rebound.
    pub fn step(&mut self, dt: f64, rain_active: bool, rng: &mut fastrand::Rng) -> f64 {
        if !self.dosing_active {
            self.residual *= (-DECAY_RATE * 2.0 * dt).exp();
            self.residual = self.residual.max(0.0);
            return self.residual;
        }

        self.time_since_dose += dt;
        let decay = DECAY_RATE * if rain_active { 2.0 } else { 1.0 };
        self.residual *= (-decay * dt).exp();

        if self.time_since_dose >= DOSE_INTERVAL {
            self.time_since_dose = 0.0;
            let dose_amount = gauss(rng, 0.8, 0.1);
            self.residual += dose_amount.max(0.1);
        }

        self.residual = self.residual.clamp(0.0, 5.0);
        // Analyser noise.
        self.residual += gauss(rng, 0.0, 0.02);
        self.residual = self.residual.clamp(0.0, 5.0);
        self.residual
    }
}

// ===========================================================================
// Tests
// ===========================================================================
