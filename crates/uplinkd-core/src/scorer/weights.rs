//! Canonical per-class scoring weight tables (§4.4, Open Question resolved
//! in `DESIGN.md`: exact numeric defaults vary across source material, so
//! one canonical table is picked per class and exposed via config).

use uplinkd_common::MemberClass;

/// Weights for the four normalized sub-scores that make up a composite
/// `final` score. Each weight is in `[0, 1]`; a class's weights sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct ClassWeights {
    /// Weight for normalized latency (lower latency -> higher sub-score).
    pub latency: f64,
    /// Weight for normalized loss percentage.
    pub loss: f64,
    /// Weight for normalized jitter.
    pub jitter: f64,
    /// Weight for the class-specific signal/obstruction sub-score.
    pub signal: f64,
}

impl ClassWeights {
    /// Canonical weights for a member class. Generic/Starlink weigh
    /// latency heaviest; cellular/Wi-Fi weigh signal heaviest; Starlink's
    /// signal component folds in obstruction, which dominates its weight.
    pub fn for_class(class: MemberClass) -> Self {
        match class {
            MemberClass::Starlink => ClassWeights {
                latency: 0.30,
                loss: 0.20,
                jitter: 0.10,
                signal: 0.40,
            },
            MemberClass::Cellular => ClassWeights {
                latency: 0.20,
                loss: 0.20,
                jitter: 0.10,
                signal: 0.50,
            },
            MemberClass::Wifi => ClassWeights {
                latency: 0.20,
                loss: 0.20,
                jitter: 0.15,
                signal: 0.45,
            },
            MemberClass::Lan | MemberClass::Generic => ClassWeights {
                latency: 0.45,
                loss: 0.30,
                jitter: 0.15,
                signal: 0.10,
            },
        }
    }

    /// Applies a config-supplied scalar override to the signal weight,
    /// renormalizing the remaining weights proportionally so the total
    /// stays at 1.0. Used when `MemberConfig::weight` is set.
    pub fn with_signal_override(mut self, signal: f64) -> Self {
        let signal = signal.clamp(0.0, 1.0);
        let remaining = 1.0 - signal;
        let current_remaining = self.latency + self.loss + self.jitter;
        if current_remaining > 0.0 {
            let scale = remaining / current_remaining;
            self.latency *= scale;
            self.loss *= scale;
            self.jitter *= scale;
        }
        self.signal = signal;
        self
    }
}
