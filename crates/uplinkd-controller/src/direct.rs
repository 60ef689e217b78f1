//! Direct route/metric mode (§4.7): manipulates the default route on the
//! underlying OS interface without going through a policy engine.
//!
//! Process-exec style follows `strata_agent::hardware::HardwareScanner`'s
//! `ip link set <iface> up|down` calls and the `/sys/class/net/<iface>/
//! operstate` carrier read used by its `scan_network_interfaces`.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use uplinkd_common::error::{ApplyError, VerifyError};
use uplinkd_common::Member;

use crate::RouteApplier;

/// Metric assigned to the active member's default route. Lower wins.
const ACTIVE_METRIC: u32 = 50;

#[derive(Debug, Clone)]
pub struct DirectConfig {
    /// Optional reachability target probed after commit, over whatever
    /// route the OS now has (i.e. not bound to a specific interface — the
    /// point is to confirm the OS's own routing decision took effect).
    pub canary: Option<SocketAddr>,
    pub canary_timeout: Duration,
}

impl Default for DirectConfig {
    fn default() -> Self {
        DirectConfig {
            canary: "1.1.1.1:443".parse().ok(),
            canary_timeout: Duration::from_millis(1200),
        }
    }
}

pub struct DirectApplier {
    config: DirectConfig,
}

impl DirectApplier {
    pub fn new(config: DirectConfig) -> Self {
        DirectApplier { config }
    }
}

impl Default for DirectApplier {
    fn default() -> Self {
        DirectApplier::new(DirectConfig::default())
    }
}

async fn operstate(iface: &str) -> Option<String> {
    let path = format!("/sys/class/net/{iface}/operstate");
    tokio::fs::read_to_string(&path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

async fn run_ip(args: &[&str]) -> Result<(), String> {
    let output = tokio::process::Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("failed to spawn ip: {e}"))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "ip {:?} exited with {}: {}",
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

async fn default_route_dev() -> Option<String> {
    let output = tokio::process::Command::new("ip")
        .args(["route", "show", "default"])
        .output()
        .await
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    // `default via 192.168.1.1 dev eth0 metric 50`
    text.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        while let Some(w) = words.next() {
            if w == "dev" {
                return words.next().map(|s| s.to_string());
            }
        }
        None
    })
}

async fn probe_canary(addr: SocketAddr, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

#[async_trait]
impl RouteApplier for DirectApplier {
    async fn interface_up(&self, member: &Member) -> bool {
        operstate(&member.interface).await.as_deref() == Some("up")
    }

    async fn stage(&self, _member: &Member) -> Result<(), ApplyError> {
        // Direct mode has nothing to pre-stage beyond the interface-up
        // check already performed by the controller; the route change
        // itself is atomic via `ip route replace`.
        Ok(())
    }

    async fn commit(&self, member: &Member) -> Result<(), ApplyError> {
        run_ip(&[
            "route",
            "replace",
            "default",
            "dev",
            &member.interface,
            "metric",
            &ACTIVE_METRIC.to_string(),
        ])
        .await
        .map_err(|detail| ApplyError::Commit {
            member: member.name.clone(),
            detail,
        })
    }

    async fn verify(&self, member: &Member, timeout: Duration) -> Result<(), VerifyError> {
        match default_route_dev().await {
            Some(dev) if dev == member.interface => {}
            _ => return Err(VerifyError::RouteMissing(member.name.clone())),
        }

        if operstate(&member.interface).await.as_deref() != Some("up") {
            return Err(VerifyError::CarrierDown(member.name.clone()));
        }

        if let Some(canary) = self.config.canary {
            let budget = self.config.canary_timeout.min(timeout);
            if !probe_canary(canary, budget).await {
                return Err(VerifyError::CanaryFailed {
                    member: member.name.clone(),
                    detail: format!("canary probe to {canary} failed"),
                });
            }
        }
        Ok(())
    }

    async fn rollback(&self, previous: Option<&Member>) -> Result<(), ApplyError> {
        match previous {
            Some(member) => self.commit(member).await,
            None => {
                let _ = run_ip(&["route", "del", "default"]).await;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_metric_is_low_priority_value() {
        assert_eq!(ACTIVE_METRIC, 50);
    }

    #[test]
    fn default_config_has_a_canary() {
        let cfg = DirectConfig::default();
        assert!(cfg.canary.is_some());
    }

    #[tokio::test]
    async fn interface_up_false_for_nonexistent_interface() {
        let applier = DirectApplier::default();
        let member = Member::new("ghost", uplinkd_common::MemberClass::Generic, "ghost0");
        assert!(!applier.interface_up(&member).await);
    }
}
