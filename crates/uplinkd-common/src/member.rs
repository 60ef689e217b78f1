//! Member identity and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Class of uplink a [`Member`] represents.
///
/// Determines which [`crate::Collector`]-shaped implementation handles it
/// and which scoring weight table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberClass {
    Starlink,
    Cellular,
    Wifi,
    Lan,
    Generic,
}

impl MemberClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberClass::Starlink => "starlink",
            MemberClass::Cellular => "cellular",
            MemberClass::Wifi => "wifi",
            MemberClass::Lan => "lan",
            MemberClass::Generic => "generic",
        }
    }
}

impl std::fmt::Display for MemberClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemberClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starlink" => Ok(MemberClass::Starlink),
            "cellular" => Ok(MemberClass::Cellular),
            "wifi" => Ok(MemberClass::Wifi),
            "lan" => Ok(MemberClass::Lan),
            "generic" => Ok(MemberClass::Generic),
            other => Err(format!("unknown member class: {other}")),
        }
    }
}

/// Lifecycle state of a member.
///
/// ```text
/// discovered → probing → eligible ⇄ degraded → ineligible → removed
/// ```
///
/// `probing` requires at least one successful sample before a member can
/// become `eligible`. `degraded` is entered after K consecutive transient
/// collector errors and exited back to `eligible` once a fresh sample
/// succeeds. `ineligible` is terminal until the next discovery cycle
/// (permanent collector error, or the member was administratively
/// disabled). `removed` is entered when the member disappears from either
/// the config or the OS for one full discovery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    Discovered,
    Probing,
    Eligible,
    Degraded,
    Ineligible,
    Removed,
}

impl MemberState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberState::Discovered => "discovered",
            MemberState::Probing => "probing",
            MemberState::Eligible => "eligible",
            MemberState::Degraded => "degraded",
            MemberState::Ineligible => "ineligible",
            MemberState::Removed => "removed",
        }
    }

    /// Whether a member in this state may be elected as active.
    pub fn is_electable(&self) -> bool {
        matches!(self, MemberState::Eligible | MemberState::Degraded)
    }
}

impl std::fmt::Display for MemberState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional metered/quota descriptor for a member.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuotaDescriptor {
    /// Monthly data cap in megabytes, if known.
    pub cap_mb: Option<u64>,
    /// Usage so far this period, as a fraction of `cap_mb` in [0, 1+].
    pub usage_ratio: f64,
    /// Usage ratio at or above which the member is in emergency mode and
    /// becomes ineligible under `data_cap_mode = emergency`.
    pub emergency_ratio: f64,
}

impl Default for QuotaDescriptor {
    fn default() -> Self {
        QuotaDescriptor {
            cap_mb: None,
            usage_ratio: 0.0,
            emergency_ratio: 0.95,
        }
    }
}

impl QuotaDescriptor {
    pub fn is_emergency(&self) -> bool {
        self.usage_ratio >= self.emergency_ratio
    }
}

/// Identity of one uplink. Never mutated in place — discovery replaces a
/// member wholesale (same `name`, fresh struct) when its underlying
/// config or OS presence changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    /// Unique, stable identifier (matches the config section name).
    pub name: String,
    pub class: MemberClass,
    /// Underlying OS interface name (e.g. `wwan0`, `eth0`).
    pub interface: String,
    /// User-assigned priority; higher wins ties.
    pub priority: i32,
    pub enabled: bool,
    pub metered: Option<QuotaDescriptor>,
    pub created_at: DateTime<Utc>,
    pub state: MemberState,
}

impl Member {
    pub fn new(name: impl Into<String>, class: MemberClass, interface: impl Into<String>) -> Self {
        Member {
            name: name.into(),
            class,
            interface: interface.into(),
            priority: 0,
            enabled: true,
            metered: None,
            created_at: Utc::now(),
            state: MemberState::Discovered,
        }
    }

    /// Administrative half of §3 eligibility: enabled ∧ in an electable
    /// lifecycle state. The remaining clauses (`connected`, sample
    /// staleness, quota-emergency vs `data_cap_mode`) need the latest
    /// `Sample` and the active `Config`, so they're evaluated by
    /// `uplinkd_core::decision` alongside this check.
    pub fn is_administratively_eligible(&self) -> bool {
        self.enabled && self.state.is_electable()
    }
}
