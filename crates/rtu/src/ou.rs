//! Mean-reverting stochastic sources and the samplers they draw from.
//!
//! All randomness flows through a single seeded `fastrand::Rng` owned by the
//! process generator, so a fixed seed plus a fixed tick/injection schedule
//! reproduces the whole sensor trace bit-for-bit within one build.

use std::f64::consts::TAU;

// ---------------------------------------------------------------------------
// Samplers
// ---------------------------------------------------------------------------

/// Sample from N(0,1) using the Box-Muller transform, cosine branch only.
/// One uniform pair is consumed per sample (the sine branch is discarded to
/// keep the draw count per tick fixed). `u1` is shifted into (0, 1] so the
/// logarithm stays finite.
pub fn std_normal(rng: &mut fastrand::Rng) -> f64 {
    let u1 = 1.0 - rng.f64();
    let u2 = rng.f64();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

/// Sample from N(mean, sigma).
pub fn gauss(rng: &mut fastrand::Rng, mean: f64, sigma: f64) -> f64 {
    mean + sigma * std_normal(rng)
}

/// Sample a uniform value in [lo, hi).
pub fn uniform(rng: &mut fastrand::Rng, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * rng.f64()
}

/// Sample an exponential deviate with the given mean, by inversion.
pub fn expovariate(rng: &mut fastrand::Rng, mean: f64) -> f64 {
    -mean * (1.0 - rng.f64()).ln()
}

// ---------------------------------------------------------------------------
// Ornstein-Uhlenbeck process
// ---------------------------------------------------------------------------

/// Mean-reverting random walk: `dx = theta*(mu - x)*dt + sigma*sqrt(dt)*N(0,1)`.
/// Good model for sensor noise around a setpoint. No clamping happens here;
/// physical ranges are the caller's business.
#[derive(Debug, Clone)]
pub struct Ou {
    pub mu: f64,
    pub sigma: f64,
    pub theta: f64,
    pub x: f64,
}

impl Ou {
    pub fn new(mu: f64, sigma: f64, theta: f64, x0: f64) -> Self {
        Self {
            mu,
            sigma,
            theta,
            x: x0,
        }
    }

    /// Advance the process by `dt` seconds. A non-positive `dt` leaves the
    /// state untouched and consumes no randomness.
    pub fn step(&mut self, dt: f64, rng: &mut fastrand::Rng) -> f64 {
        if dt <= 0.0 {
            return self.x;
        }
        let drift = self.theta * (self.mu - self.x) * dt;
        let diffusion = self.sigma * dt.sqrt() * std_normal(rng);
        self.x += drift + diffusion;
        self.x
    }

    /// Replace the mean, for non-stationary tracking (pH diurnal drift, the
    /// reservoir level follower).
    pub fn set_mu(&mut self, mu: f64) {
        self.mu = mu;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
