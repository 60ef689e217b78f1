//! Layered, immutable configuration snapshot (§4.1, §6.3, §10.3).
//!
//! Parsing follows the two-stage `*Input` → `resolve()` pattern: an
//! `Input` struct with `Option<T>` fields accepts a partial TOML
//! document, `resolve()` fills in defaults and validates, producing the
//! frozen [`Config`] the rest of the daemon consumes. A snapshot that
//! fails to resolve is rejected outright — the previous snapshot (or
//! compiled defaults on first load) is retained.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::member::MemberClass;

/// Governs monitoring frequency and member eligibility under quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCapMode {
    Off,
    Conservative,
    Emergency,
}

impl Default for DataCapMode {
    fn default() -> Self {
        DataCapMode::Off
    }
}

/// Resolved per-member section of the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    pub name: String,
    pub class: MemberClass,
    pub interface: String,
    pub enabled: bool,
    pub priority: i32,
    pub metered: bool,
    /// Scoring weight override; `None` uses the class's canonical table.
    pub weight: Option<f64>,
}

/// The frozen, validated configuration snapshot. Produced by
/// [`Config::from_toml_str`]; swapped into the runtime atomically (see
/// `uplinkd::runtime`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub poll_interval_ms: u64,
    pub decision_interval_ms: u64,
    pub discovery_interval_s: u64,
    pub retention_hours: u64,
    pub max_ram_mb: u64,
    pub switch_margin: f64,
    pub min_uptime_ms: u64,
    pub predictive: bool,
    pub predictive_threshold: f64,
    pub use_controller: bool,
    pub data_cap_mode: DataCapMode,
    pub verify_timeout_ms: u64,
    pub maintenance_interval_s: u64,
    pub shutdown_grace_ms: u64,
    pub persist_override_pin: bool,
    pub override_pin_path: String,
    pub members: Vec<MemberConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval_ms: 1500,
            decision_interval_ms: 5000,
            discovery_interval_s: 30,
            retention_hours: 24,
            max_ram_mb: 32,
            switch_margin: 10.0,
            min_uptime_ms: 30_000,
            predictive: false,
            predictive_threshold: 0.75,
            use_controller: true,
            data_cap_mode: DataCapMode::Off,
            verify_timeout_ms: 5_000,
            maintenance_interval_s: 300,
            shutdown_grace_ms: 10_000,
            persist_override_pin: false,
            override_pin_path: "/var/run/uplinkd/override.json".to_string(),
            members: Vec::new(),
        }
    }
}

impl Config {
    /// Parse and validate a TOML document into a frozen [`Config`].
    /// Unknown keys are ignored but logged at `warn` (§6.3: "ignored with
    /// a warning"); invalid values reject the whole snapshot.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(Config::default());
        }
        warn_unknown_keys(input);
        let parsed: ConfigInput =
            toml::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        parsed.resolve()
    }
}

/// Field names [`MainSectionInput`] understands.
const MAIN_KNOWN_KEYS: &[&str] = &[
    "poll_interval_ms",
    "decision_interval_ms",
    "discovery_interval_s",
    "retention_hours",
    "max_ram_mb",
    "switch_margin",
    "min_uptime_ms",
    "predictive",
    "predictive_threshold",
    "use_controller",
    "data_cap_mode",
    "verify_timeout_ms",
    "maintenance_interval_s",
    "shutdown_grace_ms",
    "persist_override_pin",
    "override_pin_path",
];

/// Field names [`MemberSectionInput`] understands.
const MEMBER_KNOWN_KEYS: &[&str] = &["class", "interface", "enabled", "priority", "metered", "weight"];

/// Diffs the raw TOML document's keys against the fields `ConfigInput`
/// actually deserializes, logging a warning per leftover key instead of
/// silently dropping it (serde's `#[serde(default)]` would otherwise
/// drop unrecognized keys with no trace).
fn warn_unknown_keys(input: &str) {
    let Ok(toml::Value::Table(table)) = toml::from_str::<toml::Value>(input) else {
        return;
    };
    for (section_name, value) in &table {
        let toml::Value::Table(section) = value else {
            continue;
        };
        let known = if section_name == "main" {
            MAIN_KNOWN_KEYS
        } else {
            MEMBER_KNOWN_KEYS
        };
        for key in section.keys() {
            if !known.contains(&key.as_str()) {
                tracing::warn!(section = %section_name, key = %key, "ignoring unknown config key");
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MainSectionInput {
    poll_interval_ms: Option<u64>,
    decision_interval_ms: Option<u64>,
    discovery_interval_s: Option<u64>,
    retention_hours: Option<u64>,
    max_ram_mb: Option<u64>,
    switch_margin: Option<f64>,
    min_uptime_ms: Option<u64>,
    predictive: Option<bool>,
    predictive_threshold: Option<f64>,
    use_controller: Option<bool>,
    data_cap_mode: Option<DataCapMode>,
    verify_timeout_ms: Option<u64>,
    maintenance_interval_s: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    persist_override_pin: Option<bool>,
    override_pin_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MemberSectionInput {
    class: Option<String>,
    interface: Option<String>,
    enabled: Option<bool>,
    priority: Option<i32>,
    metered: Option<bool>,
    weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigInput {
    main: MainSectionInput,
    #[serde(flatten)]
    members: HashMap<String, MemberSectionInput>,
}

impl ConfigInput {
    fn resolve(self) -> Result<Config, ConfigError> {
        let defaults = Config::default();
        let main = self.main;

        let switch_margin = main.switch_margin.unwrap_or(defaults.switch_margin);
        if switch_margin < 0.0 {
            return Err(ConfigError::Invalid {
                field: "switch_margin".into(),
                detail: "must be non-negative".into(),
            });
        }

        let predictive_threshold = main
            .predictive_threshold
            .unwrap_or(defaults.predictive_threshold);
        if !(0.0..=1.0).contains(&predictive_threshold) {
            return Err(ConfigError::Invalid {
                field: "predictive_threshold".into(),
                detail: "must be in [0, 1]".into(),
            });
        }

        let mut members = Vec::with_capacity(self.members.len());
        let mut seen = std::collections::HashSet::new();
        // `main` is consumed via `HashMap<String, MemberSectionInput>`'s
        // `#[serde(flatten)]`, so member section names come from whatever
        // top-level TOML tables aren't `main`.
        for (name, section) in self.members {
            if name == "main" {
                continue;
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateMember(name));
            }
            let class_str = section.class.as_deref().unwrap_or("generic");
            let class = class_str
                .parse::<MemberClass>()
                .map_err(|detail| ConfigError::Invalid {
                    field: format!("{name}.class"),
                    detail,
                })?;
            members.push(MemberConfig {
                interface: section.interface.clone().unwrap_or_else(|| name.clone()),
                name,
                class,
                enabled: section.enabled.unwrap_or(true),
                priority: section.priority.unwrap_or(0),
                metered: section.metered.unwrap_or(false),
                weight: section.weight,
            });
        }
        members.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Config {
            poll_interval_ms: main.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            decision_interval_ms: main
                .decision_interval_ms
                .unwrap_or(defaults.decision_interval_ms),
            discovery_interval_s: main
                .discovery_interval_s
                .unwrap_or(defaults.discovery_interval_s),
            retention_hours: main.retention_hours.unwrap_or(defaults.retention_hours),
            max_ram_mb: main.max_ram_mb.unwrap_or(defaults.max_ram_mb),
            switch_margin,
            min_uptime_ms: main.min_uptime_ms.unwrap_or(defaults.min_uptime_ms),
            predictive: main.predictive.unwrap_or(defaults.predictive),
            predictive_threshold,
            use_controller: main.use_controller.unwrap_or(defaults.use_controller),
            data_cap_mode: main.data_cap_mode.unwrap_or(defaults.data_cap_mode),
            verify_timeout_ms: main.verify_timeout_ms.unwrap_or(defaults.verify_timeout_ms),
            maintenance_interval_s: main
                .maintenance_interval_s
                .unwrap_or(defaults.maintenance_interval_s),
            shutdown_grace_ms: main.shutdown_grace_ms.unwrap_or(defaults.shutdown_grace_ms),
            persist_override_pin: main
                .persist_override_pin
                .unwrap_or(defaults.persist_override_pin),
            override_pin_path: main
                .override_pin_path
                .unwrap_or(defaults.override_pin_path),
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.switch_margin, 10.0);
        assert!(cfg.members.is_empty());
    }

    #[test]
    fn parses_main_and_member_sections() {
        let toml = r#"
            [main]
            switch_margin = 15
            predictive = true

            [starlink0]
            class = "starlink"
            interface = "eth1"
            priority = 10

            [cell0]
            class = "cellular"
            metered = true
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.switch_margin, 15.0);
        assert!(cfg.predictive);
        assert_eq!(cfg.members.len(), 2);
        let cell0 = cfg.members.iter().find(|m| m.name == "cell0").unwrap();
        assert!(cell0.metered);
        assert_eq!(cell0.interface, "cell0");
        let starlink0 = cfg.members.iter().find(|m| m.name == "starlink0").unwrap();
        assert_eq!(starlink0.priority, 10);
        assert_eq!(starlink0.interface, "eth1");
    }

    #[test]
    fn rejects_negative_switch_margin() {
        let toml = "[main]\nswitch_margin = -1\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_unknown_member_class() {
        let toml = "[wan0]\nclass = \"satellite\"\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn rejects_predictive_threshold_out_of_range() {
        let toml = "[main]\npredictive_threshold = 1.5\n";
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_keys_are_ignored_not_rejected() {
        let toml = r#"
            [main]
            switch_margin = 12
            totally_unknown_key = 1

            [wan0]
            class = "generic"
            bogus = true
        "#;
        let cfg = Config::from_toml_str(toml).unwrap();
        assert_eq!(cfg.switch_margin, 12.0);
        assert_eq!(cfg.members.len(), 1);
    }
}
