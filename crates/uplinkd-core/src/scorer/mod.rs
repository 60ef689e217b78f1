//! Pure scoring function (§4.4): `score(samples_window, class_weights) ->
//! Score`. Deterministic given identical inputs — no hidden state, no
//! wall-clock reads beyond what is already embedded in the samples, so the
//! decision engine's testable properties (§8) hold.

pub mod ewma;
pub mod kalman;
pub mod weights;

use uplinkd_common::{ClassSample, MemberClass, Sample, Score, Trend};

use self::ewma::Ewma;
pub use self::weights::ClassWeights;

/// Minimum window length before confidence can reach 1.0.
const CONFIDENT_SAMPLE_COUNT: usize = 5;

/// Per-class EWMA smoothing factor, applied to the composite sub-score
/// series. Starlink and cellular links are noisier tick-to-tick than a
/// wired LAN uplink, so they get a slower (smaller) alpha.
fn alpha_for_class(class: MemberClass) -> f64 {
    match class {
        MemberClass::Starlink => 0.25,
        MemberClass::Cellular => 0.3,
        MemberClass::Wifi => 0.35,
        MemberClass::Lan | MemberClass::Generic => 0.5,
    }
}

fn normalize_latency(latency_ms: f64) -> f64 {
    (1.0 - latency_ms / 300.0).clamp(0.0, 1.0)
}

fn normalize_loss(loss_pct: f64) -> f64 {
    (1.0 - loss_pct / 100.0).clamp(0.0, 1.0)
}

fn normalize_jitter(jitter_ms: f64) -> f64 {
    (1.0 - jitter_ms / 100.0).clamp(0.0, 1.0)
}

/// Class-specific signal/obstruction sub-score in `[0, 1]`.
fn signal_subscore(class: MemberClass, ext: &ClassSample) -> f64 {
    match (class, ext) {
        (MemberClass::Starlink, ClassSample::Starlink(s)) => {
            let obstruction_score = (1.0 - s.obstruction_pct / 100.0).clamp(0.0, 1.0);
            let snr_score = ((s.snr_db + 2.0) / 12.0).clamp(0.0, 1.0);
            // Obstruction weighs heaviest for Starlink per §4.4.
            0.7 * obstruction_score + 0.3 * snr_score
        }
        (MemberClass::Cellular, ClassSample::Cellular(c)) => {
            let sinr_norm = ((c.sinr + 20.0) / 50.0).clamp(0.0, 1.0);
            let rsrq_norm = ((c.rsrq + 20.0) / 17.0).clamp(0.0, 1.0);
            0.6 * sinr_norm + 0.4 * rsrq_norm
        }
        (MemberClass::Wifi, ClassSample::Wifi(w)) => {
            ((w.rssi as f64 + 110.0) / 90.0).clamp(0.0, 1.0)
        }
        _ => 1.0,
    }
}

/// Composite sub-score for one sample in `[0, 100]`.
fn composite_subscore(sample: &Sample, class: MemberClass, weights: &ClassWeights) -> f64 {
    if !sample.connected {
        return 0.0;
    }
    let raw = weights.latency * normalize_latency(sample.latency_ms)
        + weights.loss * normalize_loss(sample.loss_pct)
        + weights.jitter * normalize_jitter(sample.jitter_ms)
        + weights.signal * signal_subscore(class, &sample.class_ext);
    (raw * 100.0).clamp(0.0, 100.0)
}

fn variance(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / values.len() as f64
}

/// Computes a [`Score`] from a window of samples for one member, ordered
/// oldest-first. Returns [`Score::zero`] for an empty window.
pub fn score(samples_window: &[Sample], class: MemberClass, weights: &ClassWeights) -> Score {
    if samples_window.is_empty() {
        return Score::zero();
    }

    let subscores: Vec<f64> = samples_window
        .iter()
        .map(|s| composite_subscore(s, class, weights))
        .collect();

    let instant = *subscores.last().unwrap();
    let window_average = subscores.iter().sum::<f64>() / subscores.len() as f64;

    let mut ewma = Ewma::new(alpha_for_class(class));
    for &s in &subscores {
        ewma.update(s);
    }
    let ewma_value = ewma.value();

    let trend = trend_from_window(&subscores);

    let variance = variance(&subscores, window_average);
    let count_factor = (subscores.len() as f64 / CONFIDENT_SAMPLE_COUNT as f64).clamp(0.0, 1.0);
    // Variance is in score-points^2; 400 (20-point stddev) is treated as
    // "no confidence left" from variance alone.
    let variance_factor = (1.0 - variance / 400.0).clamp(0.0, 1.0);
    let confidence = count_factor * variance_factor;

    Score {
        instant,
        window_average,
        ewma: ewma_value,
        r#final: ewma_value,
        trend,
        confidence,
    }
}

/// Trend from the slope of the sub-score series over the window: compares
/// the mean of the first half against the mean of the second half.
fn trend_from_window(subscores: &[f64]) -> Trend {
    if subscores.len() < 2 {
        return Trend::Stable;
    }
    let mid = subscores.len() / 2;
    let (first, second) = subscores.split_at(mid);
    let first_avg = first.iter().sum::<f64>() / first.len() as f64;
    let second_avg = second.iter().sum::<f64>() / second.len() as f64;
    let delta = second_avg - first_avg;
    if delta > 2.0 {
        Trend::Improving
    } else if delta < -2.0 {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_common::{CellularExt, StarlinkExt, WifiExt};

    fn generic_sample(latency_ms: f64, loss_pct: f64, jitter_ms: f64) -> Sample {
        Sample::connected_ok(latency_ms, loss_pct, jitter_ms, ClassSample::Generic)
    }

    #[test]
    fn empty_window_is_zero_score() {
        let w = ClassWeights::for_class(MemberClass::Generic);
        let s = score(&[], MemberClass::Generic, &w);
        assert_eq!(s.r#final, 0.0);
        assert_eq!(s.confidence, 0.0);
    }

    #[test]
    fn deterministic_given_identical_inputs() {
        let w = ClassWeights::for_class(MemberClass::Generic);
        let window = vec![generic_sample(20.0, 0.0, 2.0), generic_sample(25.0, 0.5, 3.0)];
        let a = score(&window, MemberClass::Generic, &w);
        let b = score(&window, MemberClass::Generic, &w);
        assert_eq!(a.r#final, b.r#final);
        assert_eq!(a.confidence, b.confidence);
        assert_eq!(a.trend, b.trend);
    }

    #[test]
    fn good_generic_link_scores_high() {
        let w = ClassWeights::for_class(MemberClass::Generic);
        let window: Vec<Sample> = (0..10).map(|_| generic_sample(15.0, 0.0, 1.0)).collect();
        let s = score(&window, MemberClass::Generic, &w);
        assert!(s.r#final > 80.0, "expected high score, got {}", s.r#final);
    }

    #[test]
    fn disconnected_sample_scores_zero() {
        let w = ClassWeights::for_class(MemberClass::Generic);
        let mut sample = generic_sample(15.0, 0.0, 1.0);
        sample.connected = false;
        let s = score(&[sample], MemberClass::Generic, &w);
        assert_eq!(s.instant, 0.0);
    }

    #[test]
    fn declining_trend_detected() {
        let w = ClassWeights::for_class(MemberClass::Generic);
        let window: Vec<Sample> = (0..10)
            .map(|i| generic_sample(10.0 + i as f64 * 15.0, 0.0, 1.0))
            .collect();
        let s = score(&window, MemberClass::Generic, &w);
        assert_eq!(s.trend, Trend::Declining);
    }

    #[test]
    fn confidence_grows_with_sample_count() {
        let w = ClassWeights::for_class(MemberClass::Generic);
        let short = vec![generic_sample(20.0, 0.0, 1.0)];
        let long: Vec<Sample> = (0..10).map(|_| generic_sample(20.0, 0.0, 1.0)).collect();
        let short_score = score(&short, MemberClass::Generic, &w);
        let long_score = score(&long, MemberClass::Generic, &w);
        assert!(long_score.confidence > short_score.confidence);
    }

    #[test]
    fn starlink_obstruction_drags_score_down() {
        let w = ClassWeights::for_class(MemberClass::Starlink);
        let clear = Sample::connected_ok(
            30.0,
            0.0,
            2.0,
            ClassSample::Starlink(StarlinkExt {
                obstruction_pct: 0.0,
                snr_db: 9.0,
                ..Default::default()
            }),
        );
        let obstructed = Sample::connected_ok(
            30.0,
            0.0,
            2.0,
            ClassSample::Starlink(StarlinkExt {
                obstruction_pct: 40.0,
                snr_db: 9.0,
                ..Default::default()
            }),
        );
        let clear_score = score(&[clear], MemberClass::Starlink, &w);
        let obstructed_score = score(&[obstructed], MemberClass::Starlink, &w);
        assert!(obstructed_score.r#final < clear_score.r#final);
    }

    #[test]
    fn cellular_weighs_signal_heaviest() {
        let w = ClassWeights::for_class(MemberClass::Cellular);
        let strong = Sample::connected_ok(
            40.0,
            0.0,
            3.0,
            ClassSample::Cellular(CellularExt {
                rsrp: -80.0,
                rsrq: -6.0,
                sinr: 20.0,
                network_type: "5G".into(),
                roaming: false,
                operator: "test".into(),
            }),
        );
        let weak = Sample::connected_ok(
            40.0,
            0.0,
            3.0,
            ClassSample::Cellular(CellularExt {
                rsrp: -110.0,
                rsrq: -18.0,
                sinr: -8.0,
                network_type: "3G".into(),
                roaming: false,
                operator: "test".into(),
            }),
        );
        let strong_score = score(&[strong], MemberClass::Cellular, &w);
        let weak_score = score(&[weak], MemberClass::Cellular, &w);
        assert!(weak_score.r#final < strong_score.r#final);
    }

    #[test]
    fn wifi_rssi_normalized() {
        let w = ClassWeights::for_class(MemberClass::Wifi);
        let good = Sample::connected_ok(
            10.0,
            0.0,
            1.0,
            ClassSample::Wifi(WifiExt {
                rssi: -40,
                channel: 36,
                bitrate_mbps: 400.0,
            }),
        );
        let bad = Sample::connected_ok(
            10.0,
            0.0,
            1.0,
            ClassSample::Wifi(WifiExt {
                rssi: -95,
                channel: 36,
                bitrate_mbps: 10.0,
            }),
        );
        let good_score = score(&[good], MemberClass::Wifi, &w);
        let bad_score = score(&[bad], MemberClass::Wifi, &w);
        assert!(bad_score.r#final < good_score.r#final);
    }
}
