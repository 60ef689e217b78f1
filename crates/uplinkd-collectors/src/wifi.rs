//! Wi-Fi station-info collector (§4.2).
//!
//! Core latency/loss/jitter come from the same multi-target probe the
//! generic collector uses (Wi-Fi still needs an RTT signal, station info
//! alone doesn't give one); `rssi`/`channel`/`bitrate_mbps` come from
//! `iw dev <iface> link` and `iw dev <iface> info`, run as child
//! processes against the `wl0`/`wlan0`-style station interface.

use std::time::Duration;

use async_trait::async_trait;
use uplinkd_common::{ClassSample, CollectError, Member, Sample, WifiExt};

use crate::generic::GenericCollector;
use crate::Collector;

const RSSI_RANGE: (i32, i32) = (-110, -20);

#[derive(Debug, Clone)]
pub struct WifiConfig {
    pub command_timeout: Duration,
}

impl Default for WifiConfig {
    fn default() -> Self {
        WifiConfig {
            command_timeout: Duration::from_millis(800),
        }
    }
}

pub struct WifiCollector {
    config: WifiConfig,
    probe: GenericCollector,
}

impl WifiCollector {
    pub fn new(config: WifiConfig) -> Self {
        WifiCollector {
            config,
            probe: GenericCollector::default(),
        }
    }
}

impl Default for WifiCollector {
    fn default() -> Self {
        WifiCollector::new(WifiConfig::default())
    }
}

#[async_trait]
impl Collector for WifiCollector {
    async fn collect(&self, member: &Member, deadline: Duration) -> Result<Sample, CollectError> {
        let station = tokio::time::timeout(
            self.config.command_timeout.min(deadline),
            query_station(member.interface.clone()),
        )
        .await
        .map_err(|_| CollectError::Transient("iw station query timed out".to_string()))??;

        if !station.associated {
            return Ok(Sample {
                timestamp: chrono::Utc::now(),
                latency_ms: 0.0,
                loss_pct: 100.0,
                jitter_ms: 0.0,
                connected: false,
                degraded: false,
                class_ext: ClassSample::Wifi(WifiExt {
                    rssi: RSSI_RANGE.0,
                    channel: 0,
                    bitrate_mbps: 0.0,
                }),
            });
        }

        let mut sample = self.probe.collect(member, deadline).await?;
        sample.class_ext = ClassSample::Wifi(WifiExt {
            rssi: station.rssi_dbm.clamp(RSSI_RANGE.0, RSSI_RANGE.1),
            channel: station.channel,
            bitrate_mbps: station.bitrate_mbps,
        });
        Ok(sample)
    }
}

struct StationInfo {
    associated: bool,
    rssi_dbm: i32,
    bitrate_mbps: f64,
    channel: u16,
}

async fn query_station(iface: String) -> Result<StationInfo, CollectError> {
    let link_out = tokio::process::Command::new("iw")
        .args(["dev", &iface, "link"])
        .output()
        .await
        .map_err(|e| CollectError::Transient(format!("failed to spawn iw: {e}")))?;
    let link_text = String::from_utf8_lossy(&link_out.stdout).to_string();

    if link_text.trim_start().starts_with("Not connected") {
        return Ok(StationInfo {
            associated: false,
            rssi_dbm: RSSI_RANGE.0,
            bitrate_mbps: 0.0,
            channel: 0,
        });
    }

    let info_out = tokio::process::Command::new("iw")
        .args(["dev", &iface, "info"])
        .output()
        .await
        .map_err(|e| CollectError::Transient(format!("failed to spawn iw: {e}")))?;
    let info_text = String::from_utf8_lossy(&info_out.stdout).to_string();

    Ok(StationInfo {
        associated: true,
        rssi_dbm: parse_signal(&link_text).unwrap_or(RSSI_RANGE.0),
        bitrate_mbps: parse_bitrate(&link_text).unwrap_or(0.0),
        channel: parse_channel(&info_text).unwrap_or(0),
    })
}

/// `signal: -58 dBm`
fn parse_signal(link_text: &str) -> Option<i32> {
    let line = link_text.lines().find(|l| l.trim_start().starts_with("signal:"))?;
    line.split_whitespace().nth(1)?.parse::<i32>().ok()
}

/// `tx bitrate: 866.7 MBit/s`
fn parse_bitrate(link_text: &str) -> Option<f64> {
    let line = link_text
        .lines()
        .find(|l| l.trim_start().starts_with("tx bitrate:"))?;
    line.split_whitespace().nth(2)?.parse::<f64>().ok()
}

/// `channel 36 (5180 MHz), ...`
fn parse_channel(info_text: &str) -> Option<u16> {
    let line = info_text.lines().find(|l| l.trim_start().starts_with("channel"))?;
    line.split_whitespace().nth(1)?.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_signal_extracts_dbm() {
        let text = "Connected to aa:bb\n\tssid: home\n\tsignal: -58 dBm\n\ttx bitrate: 866.7 MBit/s\n";
        assert_eq!(parse_signal(text), Some(-58));
    }

    #[test]
    fn parse_bitrate_extracts_mbps() {
        let text = "\ttx bitrate: 866.7 MBit/s VHT-MCS 9\n";
        assert_eq!(parse_bitrate(text), Some(866.7));
    }

    #[test]
    fn parse_channel_extracts_number() {
        let text = "Interface wlan0\n\tchannel 36 (5180 MHz), width: 80 MHz\n";
        assert_eq!(parse_channel(text), Some(36));
    }

    #[test]
    fn missing_signal_line_is_none() {
        assert_eq!(parse_signal("Not connected.\n"), None);
    }
}
