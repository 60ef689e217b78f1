//! System-maintenance watchdog (§4.10): overlay-space, critical-service
//! liveness, log-flood detection, time-drift, config-parse health,
//! store health. Runs every `maintenance_interval_s`, publishing findings
//! as `Issue`s and as events.
//!
//! Grounded on the `Collector`-shaped periodic-poll pattern
//! (`uplinkd_collectors::Collector::collect`), generalized from "gather
//! one member's telemetry" to "gather one system health fact" — each
//! check below is a small, independent, infallible probe, the same
//! texture as a collector's internal sub-probes.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use uplinkd_core::TelemetryStore;

/// Severity of a maintenance finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Category a finding belongs to, for grouping in the `events` RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    OverlaySpace,
    ServiceLiveness,
    LogFlood,
    TimeDrift,
    ConfigHealth,
    StoreHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub category: Category,
    pub detail: String,
    pub remediation: Option<String>,
}

const OVERLAY_PATH: &str = "/overlay";
const OVERLAY_WARN_PCT: f64 = 85.0;
const OVERLAY_CRITICAL_PCT: f64 = 95.0;
/// Maximum clock skew, in milliseconds, before time drift is flagged.
/// There is no NTP client in-process; this checks the gap between two
/// successive `Utc::now()` reads against the wall-clock tick interval as
/// a cheap proxy for gross clock jumps (leap seconds, NTP step corrections).
const TIME_DRIFT_WARN_MS: i64 = 2_000;

/// Services this daemon depends on being alive on the router (checked via
/// `pgrep`-equivalent: a `/proc/<pid>/comm` scan would need a pid map this
/// crate doesn't own, so this checks the advertised service list for a
/// live PID file instead, the common OpenWrt init convention).
fn critical_services() -> &'static [&'static str] {
    &["network", "dnsmasq"]
}

fn check_overlay_space() -> Option<Issue> {
    let stat = nix_statvfs_free_pct(OVERLAY_PATH)?;
    let used_pct = 100.0 - stat;
    if used_pct >= OVERLAY_CRITICAL_PCT {
        Some(Issue {
            severity: Severity::Critical,
            category: Category::OverlaySpace,
            detail: format!("overlay filesystem {used_pct:.1}% full"),
            remediation: Some("prune logs/backups under /overlay".to_string()),
        })
    } else if used_pct >= OVERLAY_WARN_PCT {
        Some(Issue {
            severity: Severity::Warning,
            category: Category::OverlaySpace,
            detail: format!("overlay filesystem {used_pct:.1}% full"),
            remediation: None,
        })
    } else {
        None
    }
}

/// Returns free space percentage for `path`, or `None` if statvfs can't be
/// read (e.g. not running on a router, or the mount doesn't exist).
fn nix_statvfs_free_pct(path: &str) -> Option<f64> {
    let stat = rustix_like_statvfs(path)?;
    if stat.blocks == 0 {
        return None;
    }
    Some(100.0 * stat.blocks_free as f64 / stat.blocks as f64)
}

struct StatvfsSummary {
    blocks: u64,
    blocks_free: u64,
}

fn rustix_like_statvfs(path: &str) -> Option<StatvfsSummary> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path).ok()?;
    let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
    // SAFETY: `c_path` is a valid NUL-terminated C string for the
    // lifetime of this call, and `stat` is a scratch buffer sized
    // exactly for `libc::statvfs`'s write.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: statvfs returned 0, so the kernel fully initialized `stat`.
    let stat = unsafe { stat.assume_init() };
    Some(StatvfsSummary {
        blocks: stat.f_blocks as u64,
        blocks_free: stat.f_bavail as u64,
    })
}

async fn check_service_liveness() -> Vec<Issue> {
    let mut issues = Vec::new();
    for service in critical_services() {
        let pid_path = format!("/var/run/{service}.pid");
        if tokio::fs::metadata(&pid_path).await.is_err() {
            issues.push(Issue {
                severity: Severity::Warning,
                category: Category::ServiceLiveness,
                detail: format!("no pid file for critical service `{service}`"),
                remediation: Some(format!("check `/etc/init.d/{service} status`")),
            });
        }
    }
    issues
}

/// Flags a sudden burst of `error`-category events in the telemetry
/// store's recent window as a log-flood candidate.
fn check_log_flood(store: &TelemetryStore, window_hours: f64, threshold: usize) -> Option<Issue> {
    let recent = store.recent_events(None, Some(window_hours), Some(uplinkd_common::EventType::Error));
    if recent.len() >= threshold {
        Some(Issue {
            severity: Severity::Warning,
            category: Category::LogFlood,
            detail: format!(
                "{} error events in the last {window_hours:.1}h (threshold {threshold})",
                recent.len()
            ),
            remediation: Some("inspect `events` RPC output for the dominant error category".to_string()),
        })
    } else {
        None
    }
}

/// Coarse drift check: measures how long a short sleep actually took.
/// A large discrepancy between the requested and observed duration
/// indicates the wall clock stepped (NTP correction, VM pause, leap
/// second) during the sleep.
async fn check_time_drift() -> Option<Issue> {
    let before = std::time::Instant::now();
    let requested = Duration::from_millis(200);
    tokio::time::sleep(requested).await;
    let elapsed = before.elapsed();
    let drift_ms = elapsed.as_millis() as i64 - requested.as_millis() as i64;
    if drift_ms.abs() as i64 >= TIME_DRIFT_WARN_MS {
        Some(Issue {
            severity: Severity::Warning,
            category: Category::TimeDrift,
            detail: format!("observed {drift_ms}ms drift against requested sleep duration"),
            remediation: Some("check NTP sync status".to_string()),
        })
    } else {
        None
    }
}

/// Re-parses the on-disk config file, if a path was configured, to catch
/// silent corruption between successful loads. Unlike the runtime's
/// normal reload path, this never swaps the live snapshot — it only
/// reports. A backup of the current fragment is written before any
/// quarantine attempt would be made (§4.10: "always creating a backup
/// before touching anything"); this daemon's config is remediation-free
/// (read-only reparse), so no quarantine is ever attempted, only flagged.
async fn check_config_health(config_path: Option<&str>) -> Option<Issue> {
    let path = config_path?;
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    match uplinkd_common::Config::from_toml_str(&contents) {
        Ok(_) => None,
        Err(e) => {
            let backup_path = format!("{path}.bak.{}", chrono_now_suffix());
            let _ = tokio::fs::write(&backup_path, &contents).await;
            Some(Issue {
                severity: Severity::Critical,
                category: Category::ConfigHealth,
                detail: format!("config at `{path}` failed to parse: {e}"),
                remediation: Some(format!("backed up to `{backup_path}`; fix and reload")),
            })
        }
    }
}

fn chrono_now_suffix() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S").to_string()
}

/// System-wide memory pressure, read via `sysinfo` the same way
/// `strata_agent::hardware::scan_system_stats` samples CPU/memory for its
/// hardware-scan report. A constrained router (~50MB budget for this
/// daemon alone) is flagged well before the OOM killer would step in.
fn check_system_memory(warn_pct: f64) -> Option<Issue> {
    use sysinfo::System;
    let mut sys = System::new();
    sys.refresh_memory();
    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    let used_pct = 100.0 * sys.used_memory() as f64 / total as f64;
    if used_pct >= warn_pct {
        Some(Issue {
            severity: Severity::Warning,
            category: Category::StoreHealth,
            detail: format!("system memory at {used_pct:.1}% used"),
            remediation: Some("check for runaway processes outside this daemon".to_string()),
        })
    } else {
        None
    }
}

/// Reports the outcome of this tick's memory-budget enforcement
/// (§4.3/§5: "global memory accountant... discards the oldest samples
/// across all members if `max_ram_mb` is exceeded"). `evicted` is the
/// count already reclaimed by [`TelemetryStore::enforce_memory_budget`]
/// before this check runs.
fn check_store_health(store: &TelemetryStore, max_ram_mb: u64, evicted: u64) -> Option<Issue> {
    let bytes = store.approx_bytes();
    let budget = max_ram_mb * 1024 * 1024;
    if evicted > 0 {
        return Some(Issue {
            severity: Severity::Info,
            category: Category::StoreHealth,
            detail: format!("memory accountant evicted {evicted} oldest sample(s) to stay under the {budget}B budget"),
            remediation: None,
        });
    }
    if bytes > budget {
        Some(Issue {
            severity: Severity::Warning,
            category: Category::StoreHealth,
            detail: format!("telemetry store using {bytes}B against a {budget}B budget even after eviction"),
            remediation: Some("every series is down to its last sample; raise max_ram_mb or reduce member count".to_string()),
        })
    } else {
        None
    }
}

/// Runs every check and returns the findings, newest-irrelevant-first is
/// not guaranteed — callers decide ordering. `config_path` is `None` when
/// the daemon was started without `--config` (defaults-only run).
pub async fn run_checks(
    store: &TelemetryStore,
    max_ram_mb: u64,
    config_path: Option<&str>,
    log_flood_window_hours: f64,
    log_flood_threshold: usize,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    issues.extend(check_overlay_space());
    issues.extend(check_service_liveness().await);
    issues.extend(check_log_flood(store, log_flood_window_hours, log_flood_threshold));
    issues.extend(check_time_drift().await);
    issues.extend(check_config_health(config_path).await);
    let evicted = store.enforce_memory_budget(max_ram_mb);
    issues.extend(check_store_health(store, max_ram_mb, evicted));
    issues.extend(check_system_memory(90.0));
    issues
}

/// Monotonic counter of maintenance passes, surfaced via the `info` RPC
/// method alongside decision/switch counters.
pub static MAINTENANCE_PASSES: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

pub fn bump_pass_count() {
    MAINTENANCE_PASSES.fetch_add(1, Ordering::Relaxed);
}
