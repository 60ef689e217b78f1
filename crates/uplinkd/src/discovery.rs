//! Member discovery: intersects the configured member list with the OS's
//! network interfaces (§3, §4.11 "created on discovery tick when found in
//! config AND present in the OS").
//!
//! Grounded on `strata_agent::hardware::HardwareScanner::scan_real`'s
//! `/sys/class/net` enumeration and its enabled-state bookkeeping, reused
//! here to confirm the interface named by a `MemberConfig` actually exists
//! before a `Member` is minted for it.

use std::collections::HashSet;

use uplinkd_common::{Member, MemberClass, MemberConfig, MemberState, QuotaDescriptor};

/// Interface names currently present under `/sys/class/net` (minus `lo`).
pub fn list_os_interfaces() -> HashSet<String> {
    let mut names = HashSet::new();
    let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
        return names;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name != "lo" {
            names.insert(name);
        }
    }
    names
}

/// Reconciles the configured members against the OS's interface set and
/// the previous discovery pass's result.
///
/// - A `MemberConfig` whose interface is present in `os_interfaces` but
///   absent from `previous` is minted fresh (`MemberState::Discovered`).
/// - One present in both keeps its previous state (discovery never
///   mutates lifecycle in place — see `uplinkd_core::state_machine`,
///   driven by collection results, not by discovery).
/// - One present in `previous` but whose interface disappeared from the
///   OS, or whose config section was removed, is dropped here; the
///   caller is responsible for treating that as `AbsentOneCycle` for one
///   full cycle before actually removing it from the telemetry store
///   (§4.11: "removed when absent from the config OR the OS for one
///   discovery cycle").
pub fn discover(
    members_config: &[MemberConfig],
    os_interfaces: &HashSet<String>,
    previous: &[Member],
) -> Vec<Member> {
    members_config
        .iter()
        .filter(|cfg| os_interfaces.contains(&cfg.interface))
        .map(|cfg| {
            if let Some(existing) = previous.iter().find(|m| m.name == cfg.name) {
                let mut member = existing.clone();
                member.enabled = cfg.enabled;
                member.priority = cfg.priority;
                member.metered = if cfg.metered {
                    Some(member.metered.unwrap_or_default())
                } else {
                    None
                };
                member
            } else {
                mint(cfg)
            }
        })
        .collect()
}

fn mint(cfg: &MemberConfig) -> Member {
    let mut member = Member::new(cfg.name.clone(), cfg.class, cfg.interface.clone());
    member.priority = cfg.priority;
    member.enabled = cfg.enabled;
    member.metered = if cfg.metered {
        Some(QuotaDescriptor::default())
    } else {
        None
    };
    member.state = MemberState::Discovered;
    member
}

/// Member names present in `previous` but no longer returned by
/// `discover` — either their config section or their OS interface
/// disappeared this cycle.
pub fn dropped_since<'a>(previous: &'a [Member], current: &[Member]) -> Vec<&'a Member> {
    previous
        .iter()
        .filter(|m| !current.iter().any(|c| c.name == m.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, interface: &str) -> MemberConfig {
        MemberConfig {
            name: name.to_string(),
            class: MemberClass::Generic,
            interface: interface.to_string(),
            enabled: true,
            priority: 0,
            metered: false,
            weight: None,
        }
    }

    #[test]
    fn member_is_minted_only_when_interface_present() {
        let members_config = vec![cfg("wan0", "eth0"), cfg("wan1", "wwan0")];
        let os_interfaces: HashSet<String> = ["eth0".to_string()].into_iter().collect();
        let result = discover(&members_config, &os_interfaces, &[]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name, "wan0");
        assert_eq!(result[0].state, MemberState::Discovered);
    }

    #[test]
    fn existing_member_keeps_its_lifecycle_state() {
        let members_config = vec![cfg("wan0", "eth0")];
        let os_interfaces: HashSet<String> = ["eth0".to_string()].into_iter().collect();
        let mut previous = mint(&members_config[0]);
        previous.state = MemberState::Eligible;
        let result = discover(&members_config, &os_interfaces, &[previous]);
        assert_eq!(result[0].state, MemberState::Eligible);
    }

    #[test]
    fn dropped_since_reports_vanished_members() {
        let members_config = vec![cfg("wan0", "eth0")];
        let os_interfaces: HashSet<String> = HashSet::new();
        let previous = vec![mint(&cfg("wan0", "eth0"))];
        let current = discover(&members_config, &os_interfaces, &previous);
        assert!(current.is_empty());
        let dropped = dropped_since(&previous, &current);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].name, "wan0");
    }
}
