//! Rolling quality evaluation produced by the scorer.

use serde::{Deserialize, Serialize};

/// Direction of recent score movement, derived from the slope of the EWMA
/// over the last N windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Rolling quality evaluation for one member, recomputed every decision
/// tick from the telemetry store's recent window. Deterministic given
/// identical sample windows — see `uplinkd_core::scorer`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Score {
    /// Score derived from only the latest sample.
    pub instant: f64,
    /// Mean over the fixed scoring window.
    pub window_average: f64,
    /// Exponential moving average of the composite score.
    pub ewma: f64,
    /// Weighted composite in [0, 100]. This is what the decision engine
    /// ranks members by.
    pub r#final: f64,
    pub trend: Trend,
    /// In [0, 1]; a function of sample count and variance within the
    /// window. Low confidence does not exclude a member from election but
    /// is surfaced via RPC for operator visibility.
    pub confidence: f64,
}

impl Score {
    /// A neutral score for a member with no usable samples yet — never
    /// ranks above a member with any real data.
    pub fn zero() -> Self {
        Score {
            instant: 0.0,
            window_average: 0.0,
            ewma: 0.0,
            r#final: 0.0,
            trend: Trend::Stable,
            confidence: 0.0,
        }
    }
}
