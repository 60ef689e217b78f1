//! Telemetry observations produced exclusively by collectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Starlink-specific sample extension.
///
/// Field ranges follow the dish's `get_status`/`get_diagnostics` gRPC
/// responses; values outside documented ranges are clamped by the
/// collector before the sample is stored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StarlinkExt {
    pub obstruction_pct: f64,
    pub snr_db: f64,
    pub reboot_ready: bool,
    pub thermal_throttle: bool,
    pub thermal_shutdown: bool,
    pub outages_count: u32,
    pub uptime_s: u64,
}

/// Cellular-specific sample extension.
///
/// `rsrp`/`rsrq`/`sinr` are in dBm/dB/dB respectively and are clipped to
/// protocol-defined ranges by the collector (see
/// `uplinkd_collectors::cellular`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellularExt {
    pub rsrp: f64,
    pub rsrq: f64,
    pub sinr: f64,
    pub network_type: String,
    pub roaming: bool,
    pub operator: String,
}

/// Wi-Fi station-info sample extension.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WifiExt {
    /// Received signal strength indicator in dBm, clipped to [-110, -20].
    pub rssi: i32,
    pub channel: u16,
    pub bitrate_mbps: f64,
}

/// Per-class additive extension carried alongside the core sample fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum ClassSample {
    Starlink(StarlinkExt),
    Cellular(CellularExt),
    Wifi(WifiExt),
    Lan,
    Generic,
}

/// One telemetry observation. Immutable once stored by the telemetry
/// store; only ever produced by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub loss_pct: f64,
    pub jitter_ms: f64,
    pub connected: bool,
    /// Set when the sample was produced after a transient collector
    /// error rather than a successful probe; values are the last known
    /// good values, not fresh observations.
    pub degraded: bool,
    pub class_ext: ClassSample,
}

impl Sample {
    pub fn connected_ok(
        latency_ms: f64,
        loss_pct: f64,
        jitter_ms: f64,
        class_ext: ClassSample,
    ) -> Self {
        Sample {
            timestamp: Utc::now(),
            latency_ms,
            loss_pct,
            jitter_ms,
            connected: true,
            degraded: false,
            class_ext,
        }
    }

    /// Builds a degraded sample from the last known-good sample, per §4.2:
    /// "Transient errors insert a degraded sample (last values retained,
    /// `connected=false` if repeated)."
    pub fn degraded_from(previous: &Sample, still_connected: bool) -> Self {
        Sample {
            timestamp: Utc::now(),
            latency_ms: previous.latency_ms,
            loss_pct: previous.loss_pct,
            jitter_ms: previous.jitter_ms,
            connected: still_connected,
            degraded: true,
            class_ext: previous.class_ext.clone(),
        }
    }
}
