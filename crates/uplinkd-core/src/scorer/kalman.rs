//! Two-state Kalman filter for trend/slope estimation.
//!
//! State vector `[value, velocity]`. The velocity term lets the predictor
//! (§4.5) reason about a member's trajectory between samples rather than
//! just its latest instantaneous reading — used to detect a link that is
//! trending toward failure before it actually drops.

/// A two-state Kalman filter: `[value, velocity]`.
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    x: f64,
    v: f64,

    p00: f64,
    p01: f64,
    p11: f64,

    q_value: f64,
    q_velocity: f64,
    r: f64,

    initialized: bool,
}

/// Tuning knobs for one [`KalmanFilter`] instance.
#[derive(Debug, Clone)]
pub struct KalmanConfig {
    pub q_value: f64,
    pub q_velocity: f64,
    pub r: f64,
}

impl KalmanConfig {
    /// Tuned for latency series in milliseconds.
    pub fn for_latency() -> Self {
        KalmanConfig {
            q_value: 0.5,
            q_velocity: 0.1,
            r: 10.0,
        }
    }

    /// Tuned for loss percentage series (0-100).
    pub fn for_loss() -> Self {
        KalmanConfig {
            q_value: 0.2,
            q_velocity: 0.05,
            r: 4.0,
        }
    }

    /// Tuned for signal-strength-like series (RSRP/RSRQ/SINR, dBm/dB).
    pub fn for_signal() -> Self {
        KalmanConfig {
            q_value: 1.0,
            q_velocity: 0.2,
            r: 5.0,
        }
    }

    /// Tuned for the composite 0-100 score series driving predictive risk.
    pub fn for_score() -> Self {
        KalmanConfig {
            q_value: 2.0,
            q_velocity: 0.3,
            r: 20.0,
        }
    }
}

impl KalmanFilter {
    pub fn new(config: &KalmanConfig) -> Self {
        KalmanFilter {
            x: 0.0,
            v: 0.0,
            p00: 1000.0,
            p01: 0.0,
            p11: 1000.0,
            q_value: config.q_value,
            q_velocity: config.q_velocity,
            r: config.r,
            initialized: false,
        }
    }

    pub fn value(&self) -> f64 {
        self.x
    }

    pub fn velocity(&self) -> f64 {
        self.v
    }

    pub fn is_increasing(&self) -> bool {
        self.v > 0.0
    }

    pub fn uncertainty(&self) -> f64 {
        self.p00.sqrt()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn predict(&mut self) {
        self.x += self.v;

        let new_p00 = self.p00 + 2.0 * self.p01 + self.p11 + self.q_value;
        let new_p01 = self.p01 + self.p11 + self.q_velocity;
        let new_p11 = self.p11 + self.q_velocity;

        self.p00 = new_p00;
        self.p01 = new_p01;
        self.p11 = new_p11;
    }

    pub fn update(&mut self, measurement: f64) {
        if measurement.is_nan() || measurement.is_infinite() {
            return;
        }
        if !self.initialized {
            self.x = measurement;
            self.v = 0.0;
            self.initialized = true;
            return;
        }

        self.predict();

        let y = measurement - self.x;
        let s = self.p00 + self.r;

        let k0 = self.p00 / s;
        let k1 = self.p01 / s;

        self.x += k0 * y;
        self.v += k1 * y;

        let new_p00 = self.p00 - k0 * self.p00;
        let new_p01 = self.p01 - k0 * self.p01;
        let new_p11 = self.p11 - k1 * self.p01;

        self.p00 = new_p00;
        self.p01 = new_p01;
        self.p11 = new_p11;
    }

    /// Predicts the value `steps` ticks ahead without mutating state.
    pub fn predict_ahead(&self, steps: u32) -> f64 {
        self.x + self.v * steps as f64
    }

    pub fn reset(&mut self) {
        self.x = 0.0;
        self.v = 0.0;
        self.p00 = 1000.0;
        self.p01 = 0.0;
        self.p11 = 1000.0;
        self.initialized = false;
    }
}
