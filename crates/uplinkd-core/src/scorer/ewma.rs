//! Exponentially Weighted Moving Average filter.
//!
//! Smooths a noisy measurement series by weighting recent samples more
//! heavily. Used by the scorer to compute the `ewma` component of a
//! member's [`uplinkd_common::Score`] from its latency/loss/jitter/signal
//! series.
//!
//! The smoothing factor `alpha` controls responsiveness:
//! - `alpha` near 1.0: tracks input closely (low smoothing)
//! - `alpha` near 0.0: retains history (high smoothing)
pub struct Ewma {
    value: f64,
    alpha: f64,
    initialized: bool,
}

impl Ewma {
    /// Creates a new EWMA filter with the given smoothing factor (`0.0 < alpha ≤ 1.0`).
    pub fn new(alpha: f64) -> Self {
        Self {
            value: 0.0,
            alpha,
            initialized: false,
        }
    }

    /// Feeds a new measurement into the filter, updating the smoothed value.
    ///
    /// NaN or infinite measurements are silently ignored to prevent
    /// poisoning the smoothed value.
    pub fn update(&mut self, measurement: f64) {
        if measurement.is_nan() || measurement.is_infinite() {
            return;
        }
        if !self.initialized {
            self.value = measurement;
            self.initialized = true;
        } else {
            self.value = self.value * (1.0 - self.alpha) + measurement * self.alpha;
        }
    }

    /// Returns the current smoothed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}
