//! Per-class telemetry collectors (§4.2).
//!
//! Each [`Collector`] implementation knows how to gather one member
//! class's [`Sample`] within a deadline. The daemon's collection task
//! (`uplinkd::runtime`) owns one collector per member, polling at
//! `poll_interval_ms` except for Starlink, which is polled at the
//! decision cadence (see §5).

pub mod cellular;
pub mod generic;
pub mod starlink;
pub mod wifi;

use std::time::Duration;

use async_trait::async_trait;
use uplinkd_common::{CollectError, Member, Sample};

pub use cellular::CellularCollector;
pub use generic::GenericCollector;
pub use starlink::StarlinkCollector;
pub use wifi::WifiCollector;

/// Uniform capability for gathering one [`Sample`] from a [`Member`].
///
/// Implementations must respect `deadline` — a probe that can't complete
/// in time should return `CollectError::Transient` rather than block the
/// collection task past its poll interval.
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(&self, member: &Member, deadline: Duration) -> Result<Sample, CollectError>;
}

/// Trimmed mean of a probe RTT set: drops the highest and lowest sample
/// (if at least 3 remain) and averages what's left. Shared across
/// collectors that run multiple probes per tick.
pub(crate) fn trimmed_mean(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if values.len() >= 3 {
        values.remove(values.len() - 1);
        values.remove(0);
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, used as the jitter estimate.
pub(crate) fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
