//! Predictor (§4.5): computes a per-member risk signal in `[0, 1]` from
//! trend windows and class-specific flags. Only consulted when
//! `predictive=true`; feeds the decision engine's predictive trigger (§4.6)
//! and never overrides scoring itself.
//!
//! Modeled on the teacher's `ModemSupervisor`/`SupervisorConfig` hysteresis
//! pattern, generalized from "is this link degraded" to "how likely is
//! this link to fail soon" — a continuous risk score rather than a binary
//! flag, using the same Kalman-velocity trend detection.

use uplinkd_common::{ClassSample, MemberClass, QuotaDescriptor, Sample};

use crate::scorer::kalman::{KalmanConfig, KalmanFilter};

/// Consecutive tail samples with SNR below [`LOW_SNR_DB`] needed to call a
/// Starlink link "persistently" low-signal.
const PERSISTENT_LOW_SNR_COUNT: usize = 3;
const LOW_SNR_DB: f64 = 2.0;
/// Obstruction-percent rise per tick treated as a rising trend.
const OBSTRUCTION_RISE_VELOCITY: f64 = 0.5;
/// SINR (dB) below which a predicted handoff is considered imminent.
const HANDOFF_SINR_THRESHOLD: f64 = 0.0;
const HANDOFF_LOOKAHEAD_TICKS: u32 = 5;
/// How close to the emergency ratio counts as "approaching" the data cap.
const CAP_APPROACH_MARGIN: f64 = 0.10;
const LOSS_RISE_VELOCITY: f64 = 0.5;
const LATENCY_RISE_VELOCITY: f64 = 5.0;

/// Computes the predictive risk signal for one member from its recent
/// sample window. `quota` is the member's metered/quota descriptor, if
/// any — only consulted for cellular members approaching a data cap.
pub fn predictive_risk(
    samples_window: &[Sample],
    class: MemberClass,
    quota: Option<&QuotaDescriptor>,
) -> f64 {
    if samples_window.is_empty() {
        return 0.0;
    }
    match class {
        MemberClass::Starlink => starlink_risk(samples_window),
        MemberClass::Cellular => cellular_risk(samples_window, quota),
        MemberClass::Wifi | MemberClass::Lan | MemberClass::Generic => {
            generic_risk(samples_window)
        }
    }
}

fn starlink_risk(window: &[Sample]) -> f64 {
    let exts: Vec<_> = window
        .iter()
        .filter_map(|s| match &s.class_ext {
            ClassSample::Starlink(ext) => Some(ext),
            _ => None,
        })
        .collect();
    if exts.is_empty() {
        return 0.0;
    }

    if let Some(last) = exts.last() {
        if last.thermal_shutdown || last.thermal_throttle || last.reboot_ready {
            return 1.0;
        }
    }

    let mut obstruction_filter = KalmanFilter::new(&KalmanConfig::for_signal());
    for ext in &exts {
        obstruction_filter.update(ext.obstruction_pct);
    }
    let obstruction_component = if obstruction_filter.is_initialized()
        && obstruction_filter.velocity() > OBSTRUCTION_RISE_VELOCITY
    {
        (obstruction_filter.velocity() / (OBSTRUCTION_RISE_VELOCITY * 4.0)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let low_snr_streak = exts
        .iter()
        .rev()
        .take_while(|ext| ext.snr_db < LOW_SNR_DB)
        .count();
    let snr_component = if low_snr_streak >= PERSISTENT_LOW_SNR_COUNT {
        (low_snr_streak as f64 / (PERSISTENT_LOW_SNR_COUNT as f64 * 2.0)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    obstruction_component.max(snr_component)
}

fn cellular_risk(window: &[Sample], quota: Option<&QuotaDescriptor>) -> f64 {
    let exts: Vec<_> = window
        .iter()
        .filter_map(|s| match &s.class_ext {
            ClassSample::Cellular(ext) => Some(ext),
            _ => None,
        })
        .collect();
    if exts.is_empty() {
        return 0.0;
    }

    let mut sinr_filter = KalmanFilter::new(&KalmanConfig::for_signal());
    for ext in &exts {
        sinr_filter.update(ext.sinr);
    }

    let degradation_component = if sinr_filter.is_initialized() && sinr_filter.is_increasing() {
        0.0
    } else if sinr_filter.is_initialized() {
        (-sinr_filter.velocity() / 4.0).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let handoff_component = if sinr_filter.is_initialized()
        && sinr_filter.predict_ahead(HANDOFF_LOOKAHEAD_TICKS) < HANDOFF_SINR_THRESHOLD
        && !sinr_filter.is_increasing()
    {
        0.8
    } else {
        0.0
    };

    let cap_component = quota
        .map(|q| {
            if q.is_emergency() {
                1.0
            } else if q.usage_ratio >= q.emergency_ratio - CAP_APPROACH_MARGIN {
                let remaining = q.emergency_ratio - q.usage_ratio;
                (1.0 - remaining / CAP_APPROACH_MARGIN).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    degradation_component.max(handoff_component).max(cap_component)
}

fn generic_risk(window: &[Sample]) -> f64 {
    let mut loss_filter = KalmanFilter::new(&KalmanConfig::for_loss());
    let mut latency_filter = KalmanFilter::new(&KalmanConfig::for_latency());
    for sample in window {
        loss_filter.update(sample.loss_pct);
        latency_filter.update(sample.latency_ms);
    }

    let loss_component = if loss_filter.is_initialized() && loss_filter.velocity() > LOSS_RISE_VELOCITY {
        (loss_filter.velocity() / (LOSS_RISE_VELOCITY * 4.0)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let latency_component = if latency_filter.is_initialized()
        && latency_filter.velocity() > LATENCY_RISE_VELOCITY
    {
        (latency_filter.velocity() / (LATENCY_RISE_VELOCITY * 4.0)).clamp(0.0, 1.0)
    } else {
        0.0
    };

    loss_component.max(latency_component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_common::{CellularExt, StarlinkExt};

    fn starlink_sample(obstruction_pct: f64, snr_db: f64) -> Sample {
        Sample::connected_ok(
            30.0,
            0.0,
            2.0,
            ClassSample::Starlink(StarlinkExt {
                obstruction_pct,
                snr_db,
                ..Default::default()
            }),
        )
    }

    fn cellular_sample(sinr: f64) -> Sample {
        Sample::connected_ok(
            30.0,
            0.0,
            2.0,
            ClassSample::Cellular(CellularExt {
                sinr,
                rsrq: -8.0,
                rsrp: -90.0,
                network_type: "LTE".into(),
                roaming: false,
                operator: "test".into(),
            }),
        )
    }

    fn generic_sample(latency_ms: f64, loss_pct: f64) -> Sample {
        Sample::connected_ok(latency_ms, loss_pct, 2.0, ClassSample::Generic)
    }

    #[test]
    fn empty_window_has_zero_risk() {
        assert_eq!(predictive_risk(&[], MemberClass::Generic, None), 0.0);
    }

    #[test]
    fn starlink_thermal_shutdown_saturates_risk() {
        let mut sample = starlink_sample(0.0, 10.0);
        if let ClassSample::Starlink(ref mut ext) = sample.class_ext {
            ext.thermal_shutdown = true;
        }
        let risk = predictive_risk(&[sample], MemberClass::Starlink, None);
        assert_eq!(risk, 1.0);
    }

    #[test]
    fn starlink_rising_obstruction_increases_risk() {
        let window: Vec<Sample> = (0..10)
            .map(|i| starlink_sample(i as f64 * 5.0, 10.0))
            .collect();
        let risk = predictive_risk(&window, MemberClass::Starlink, None);
        assert!(risk > 0.0);
    }

    #[test]
    fn starlink_persistent_low_snr_increases_risk() {
        let window: Vec<Sample> = (0..6).map(|_| starlink_sample(0.0, 0.5)).collect();
        let risk = predictive_risk(&window, MemberClass::Starlink, None);
        assert!(risk > 0.0);
    }

    #[test]
    fn starlink_clean_link_has_no_risk() {
        let window: Vec<Sample> = (0..10).map(|_| starlink_sample(0.0, 15.0)).collect();
        let risk = predictive_risk(&window, MemberClass::Starlink, None);
        assert_eq!(risk, 0.0);
    }

    #[test]
    fn cellular_degrading_sinr_increases_risk() {
        let window: Vec<Sample> = (0..20).map(|i| cellular_sample(20.0 - i as f64 * 2.0)).collect();
        let risk = predictive_risk(&window, MemberClass::Cellular, None);
        assert!(risk > 0.0);
    }

    #[test]
    fn cellular_approaching_cap_increases_risk() {
        let window = vec![cellular_sample(20.0)];
        let quota = QuotaDescriptor {
            cap_mb: Some(10_000),
            usage_ratio: 0.90,
            emergency_ratio: 0.95,
        };
        let risk = predictive_risk(&window, MemberClass::Cellular, Some(&quota));
        assert!(risk > 0.0);
    }

    #[test]
    fn cellular_emergency_cap_saturates_risk() {
        let window = vec![cellular_sample(20.0)];
        let quota = QuotaDescriptor {
            cap_mb: Some(10_000),
            usage_ratio: 0.99,
            emergency_ratio: 0.95,
        };
        let risk = predictive_risk(&window, MemberClass::Cellular, Some(&quota));
        assert_eq!(risk, 1.0);
    }

    #[test]
    fn generic_rising_loss_increases_risk() {
        let window: Vec<Sample> = (0..20)
            .map(|i| generic_sample(20.0, i as f64 * 3.0))
            .collect();
        let risk = predictive_risk(&window, MemberClass::Generic, None);
        assert!(risk > 0.0);
    }

    #[test]
    fn generic_stable_link_has_no_risk() {
        let window: Vec<Sample> = (0..10).map(|_| generic_sample(20.0, 0.0)).collect();
        let risk = predictive_risk(&window, MemberClass::Generic, None);
        assert_eq!(risk, 0.0);
    }
}
