//! Output of one decision-engine evaluation cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::score::Score;

/// Why a `Decision` elected the member it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// No incumbent, or the incumbent stopped being eligible.
    Recovery,
    /// Challenger beat the incumbent by at least `switch_margin` and
    /// hysteresis had elapsed.
    Score,
    /// Predictive risk on the incumbent crossed the threshold and a
    /// comparable challenger existed.
    Predictive,
    /// Operator pinned a specific member via the `failover` RPC method.
    Manual,
    /// Incumbent is metered and hit emergency usage.
    Cap,
    /// Controller verification failed after an apply; rolled back to the
    /// previous member and the candidate is penalized.
    Rollback,
}

impl TriggerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerReason::Recovery => "recovery",
            TriggerReason::Score => "score",
            TriggerReason::Predictive => "predictive",
            TriggerReason::Manual => "manual",
            TriggerReason::Cap => "cap",
            TriggerReason::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one evaluation cycle of the decision engine (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: DateTime<Utc>,
    pub elected_member: Option<String>,
    pub previous_member: Option<String>,
    /// Short human-readable explanation (e.g. "B exceeded A by 12.3").
    pub reason: String,
    /// Score snapshot of every eligible member considered this cycle,
    /// keyed by member name.
    pub scores_snapshot: HashMap<String, Score>,
    pub predictive_risk: f64,
    /// Categorical trigger, used by the testable-properties in §8.
    pub triggered_by: TriggerReason,
}

impl Decision {
    pub fn is_switch(&self) -> bool {
        self.elected_member != self.previous_member
    }
}
