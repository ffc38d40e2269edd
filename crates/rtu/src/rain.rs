//! Rain events over the raw-water catchment. Turbidity spikes sharply then
//! decays exponentially; pH drops with the acidic runoff; flow rises;
//! temperature dips. All effects are driven by the turbidity envelope so the
//! signals stay correlated.

/// One rain event. Immutable after construction; the per-signal
/// contributions are pure functions of `sim_time`.
#[derive(Debug, Clone)]
pub struct RainEvent {
    pub start_time: f64,
    pub peak_turb: f64,
    /// Total event length in sim seconds.
    pub duration: f64,
    /// Linear ramp-up window, 10% of the duration.
    rise_time: f64,
    /// Exponential decay time constant for the remainder.
    decay_tau: f64,
    ph_drop: f64,
    flow_boost_frac: f64,
    temp_dip: f64,
}

impl RainEvent {
    pub fn new(start_time: f64, peak_turb: f64, duration_hours: f64) -> Self {
        let duration = duration_hours * 3600.0;
        // Severity scaling: a 800 NTU cell drops pH by 0.8, boosts flow by
        // 20% and dips temperature by 2 degrees.
        let severity = peak_turb / 800.0;
        Self {
            start_time,
            peak_turb,
            duration,
            rise_time: duration * 0.1,
            decay_tau: duration * 0.3,
            ph_drop: 0.2 + 0.6 * severity,
            flow_boost_frac: 0.1 + 0.1 * severity,
            temp_dip: 1.0 + 1.0 * severity,
        }
    }

    pub fn is_active(&self, sim_time: f64) -> bool {
        let elapsed = sim_time - self.start_time;
        (0.0..=self.duration).contains(&elapsed)
    }

    pub fn is_expired(&self, sim_time: f64) -> bool {
        sim_time - self.start_time > self.duration
    }

    /// Turbidity envelope in NTU: linear ramp to the peak over `rise_time`,
    /// then exponential decay. Zero outside the event window.
    pub fn turbidity_contribution(&self, sim_time: f64) -> f64 {
        let elapsed = sim_time - self.start_time;
        if !(0.0..=self.duration).contains(&elapsed) {
            return 0.0;
        }
        if elapsed < self.rise_time {
            self.peak_turb * elapsed / self.rise_time
        } else {
            self.peak_turb * (-(elapsed - self.rise_time) / self.decay_tau).exp()
        }
    }

    /// Negative pH offset (acidic tropical runoff).
    pub fn ph_contribution(&self, sim_time: f64) -> f64 {
        -self.ph_drop * self.turbidity_contribution(sim_time) / self.peak_turb
    }

    /// Extra raw inflow in L/s, as a fraction of the current base flow.
    pub fn flow_contribution(&self, sim_time: f64, base_flow: f64) -> f64 {
        base_flow * self.flow_boost_frac * self.turbidity_contribution(sim_time) / self.peak_turb
    }

    /// Negative temperature offset from the cold rainwater.
    pub fn temp_contribution(&self, sim_time: f64) -> f64 {
        -self.temp_dip * self.turbidity_contribution(sim_time) / self.peak_turb
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// 6-hour, 400 NTU event starting at t=0.
    fn event() -> RainEvent {
        RainEvent::new(0.0, 400.0, 6.0)
    }

    // -- Lifecycle ----------------------------------------------------------

    #[test]
    fn derived_parameters() {
        let e = event();
        assert_eq!(e.duration, 6.0 * 3600.0);
        assert_eq!(e.rise_time, 2160.0);
        assert_eq!(e.decay_tau, 6480.0);
        assert!((e.ph_drop - 0.5).abs() < 1e-9);
        assert!((e.flow_boost_frac - 0.15).abs() < 1e-9);
        assert!((e.temp_dip - 1.5).abs() < 1e-9);
    }

    #[test]
    fn active_window() {
        let e = RainEvent::new(100.0, 400.0, 1.0);
        assert!(!e.is_active(99.0));
        assert!(e.is_active(100.0));
        assert!(e.is_active(100.0 + 3600.0));
        assert!(!e.is_active(100.0 + 3601.0));
    }

    #[test]
    fn expiry_is_strictly_after_duration() {
        let e = RainEvent::new(0.0, 400.0, 1.0);
        assert!(!e.is_expired(3600.0));
        assert!(e.is_expired(3600.1));
    }

    // -- Turbidity envelope -------------------------------------------------

    #[test]
    fn no_contribution_outside_window() {
        let e = RainEvent::new(1000.0, 400.0, 6.0);
        assert_eq!(e.turbidity_contribution(999.0), 0.0);
        assert_eq!(e.turbidity_contribution(1000.0 + e.duration + 1.0), 0.0);
    }

    #[test]
    fn rise_is_linear_to_the_peak() {
        let e = event();
        let half = e.turbidity_contribution(e.rise_time / 2.0);
        assert!((half - 200.0).abs() < 1e-9);
        let peak = e.turbidity_contribution(e.rise_time);
        assert!((peak - 400.0).abs() < 1e-9);
    }

    #[test]
    fn decay_is_exponential() {
        let e = event();
        let one_tau = e.turbidity_contribution(e.rise_time + e.decay_tau);
        assert!((one_tau - 400.0 * (-1.0f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn envelope_is_monotone_down_after_peak() {
        let e = event();
        let mut prev = e.turbidity_contribution(e.rise_time);
        let mut t = e.rise_time;
        while t < e.duration {
            t += 300.0;
            let v = e.turbidity_contribution(t);
            assert!(v <= prev);
            prev = v;
        }
    }

    // -- Correlated signals -------------------------------------------------

    #[test]
    fn ph_contribution_is_negative_and_scaled() {
        let e = event();
        // At the peak the full ph_drop applies.
        let at_peak = e.ph_contribution(e.rise_time);
        assert!((at_peak + 0.5).abs() < 1e-9);
        // Halfway up the ramp, half of it.
        let half = e.ph_contribution(e.rise_time / 2.0);
        assert!((half + 0.25).abs() < 1e-9);
    }

    #[test]
    fn flow_contribution_scales_with_base() {
        let e = event();
        let at_peak = e.flow_contribution(e.rise_time, 500.0);
        assert!((at_peak - 500.0 * 0.15).abs() < 1e-9);
        assert_eq!(e.flow_contribution(e.rise_time, 0.0), 0.0);
    }

    #[test]
    fn temp_contribution_is_a_dip() {
        let e = event();
        let at_peak = e.temp_contribution(e.rise_time);
        assert!((at_peak + 1.5).abs() < 1e-9);
        assert_eq!(e.temp_contribution(-10.0), 0.0);
    }
}
