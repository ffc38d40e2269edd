//! Time-of-day demand and temperature curves for a tropical surface-water
//! catchment: low overnight demand, morning and evening peaks, and a daily
//! temperature swing that bottoms out before dawn.

use std::f64::consts::PI;

/// Daily water demand curve. Low overnight (~60% of base), morning peak
/// around 7:30 (~120%), a small midday bump, afternoon peak around 17:30.
pub fn diurnal_flow(hour_of_day: f64, base: f64) -> f64 {
    let h = hour_of_day.rem_euclid(24.0);
    let overnight = 0.60;
    let am_peak = 0.60 * (-(h - 7.5).powi(2) / 4.0).exp();
    let pm_peak = 0.45 * (-(h - 17.5).powi(2) / 3.0).exp();
    let midday = 0.20 * (-(h - 12.0).powi(2) / 6.0).exp();
    base * (overnight + am_peak + pm_peak + midday)
}

/// Daily temperature cycle: a sinusoid between `base_min` and `base_max`,
/// phase-anchored at 14:00.
pub fn diurnal_temp(hour_of_day: f64, base_min: f64, base_max: f64) -> f64 {
    let h = hour_of_day.rem_euclid(24.0);
    let mid = (base_min + base_max) / 2.0;
    let amp = (base_max - base_min) / 2.0;
    let phase = 2.0 * PI * (h - 14.0) / 24.0;
    mid - amp * phase.cos()
}

// ===========================================================================
// Tests
// ===========================================================================
