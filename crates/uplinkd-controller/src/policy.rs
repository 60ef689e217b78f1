//! Policy mode (§4.7, `use_controller=true`): delegates the primary-member
//! decision to the router's multi-WAN policy engine (OpenWrt's `mwan3`)
//! instead of touching routes directly. `uplinkd` stays the brain; `mwan3`
//! stays the hands that already know how to juggle per-interface routing
//! tables and `iptables` marks.
//!
//! Process-exec style follows the same `std::process::Command`-per-call
//! idiom used for the `uqmi`/AT-chain cellular collector and the
//! `ip link set` calls in `strata_agent::hardware`.

use std::time::Duration;

use async_trait::async_trait;
use uplinkd_common::error::{ApplyError, VerifyError};
use uplinkd_common::Member;

use crate::RouteApplier;

pub struct PolicyApplier {
    /// uci config section prefix for this daemon's generated policy,
    /// e.g. `mwan3.uplinkd_policy`.
    policy_section: String,
}

impl PolicyApplier {
    pub fn new(policy_section: impl Into<String>) -> Self {
        PolicyApplier {
            policy_section: policy_section.into(),
        }
    }
}

impl Default for PolicyApplier {
    fn default() -> Self {
        PolicyApplier::new("mwan3.uplinkd_policy")
    }
}

fn member_section(name: &str) -> String {
    format!("member_{name}")
}

async fn run(cmd: &str, args: &[&str]) -> Result<String, String> {
    let output = tokio::process::Command::new(cmd)
        .args(args)
        .output()
        .await
        .map_err(|e| format!("failed to spawn {cmd}: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        Err(format!(
            "{cmd} {:?} exited with {}: {}",
            args,
            output.status,
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

#[async_trait]
impl RouteApplier for PolicyApplier {
    async fn interface_up(&self, member: &Member) -> bool {
        run("ubus", &["call", "network.interface", "status", "-S"])
            .await
            .map(|out| out.contains(&member.interface) && out.contains("\"up\":true"))
            .unwrap_or(false)
    }

    async fn stage(&self, member: &Member) -> Result<(), ApplyError> {
        let section = format!("{}.use_member1", self.policy_section);
        run(
            "uci",
            &["set", &format!("{section}={}", member_section(&member.name))],
        )
        .await
        .map(|_| ())
        .map_err(|detail| ApplyError::Stage {
            member: member.name.clone(),
            detail,
        })
    }

    async fn commit(&self, member: &Member) -> Result<(), ApplyError> {
        run("uci", &["commit", "mwan3"])
            .await
            .map_err(|detail| ApplyError::Commit {
                member: member.name.clone(),
                detail,
            })?;
        run("mwan3", &["restart"])
            .await
            .map(|_| ())
            .map_err(|detail| ApplyError::Commit {
                member: member.name.clone(),
                detail,
            })
    }

    async fn verify(&self, member: &Member, timeout: Duration) -> Result<(), VerifyError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = run("mwan3", &["status"])
                .await
                .map_err(|detail| VerifyError::CanaryFailed {
                    member: member.name.clone(),
                    detail,
                })?;

            let section = member_section(&member.name);
            let online = status
                .lines()
                .any(|l| l.contains(&member.interface) && l.contains("is online"));
            let primary = status.contains(&section) && status.contains("active");

            if online && primary {
                return Ok(());
            }
            if !online {
                return Err(VerifyError::CarrierDown(member.name.clone()));
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(VerifyError::RouteMissing(member.name.clone()));
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn rollback(&self, previous: Option<&Member>) -> Result<(), ApplyError> {
        match previous {
            Some(member) => {
                self.stage(member).await?;
                self.commit(member).await
            }
            None => {
                let section = format!("{}.use_member1", self.policy_section);
                let _ = run("uci", &["delete", &section]).await;
                run("uci", &["commit", "mwan3"])
                    .await
                    .map(|_| ())
                    .map_err(|detail| ApplyError::Commit {
                        member: "none".to_string(),
                        detail,
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_section_naming() {
        assert_eq!(member_section("starlink0"), "member_starlink0");
    }

    #[test]
    fn default_policy_section() {
        let applier = PolicyApplier::default();
        assert_eq!(applier.policy_section, "mwan3.uplinkd_policy");
    }
}
