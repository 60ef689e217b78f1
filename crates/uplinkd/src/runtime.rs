//! Task topology (§4.8, §5): one `tokio::spawn`ed task per independent
//! tick stream — discovery, per-member collection fan-out, decision,
//! maintenance, RPC dispatch — plus a `watch::<bool>` shutdown signal
//! cloned into every task and a root `select!` in [`run`] awaiting the
//! signal alongside task join handles.
//!
//! Grounded on `strata_agent::main`'s task-spawning shutdown `select!`
//! over `control_handle`/`portal_handle`.
//!
//! Every tick-stream task is wrapped by [`supervise`], which restarts a
//! task that exits unexpectedly (panics; an `Err` join result) with
//! exponential backoff, the same `backoff = (backoff * 2).min(max_backoff)`
//! reconnect shape as `strata_agent::control::run`'s control-channel loop.
//! A clean exit (the task returning because `shutdown` fired) is not a
//! failure and is not restarted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify};
use uplinkd_collectors::{CellularCollector, Collector, GenericCollector, StarlinkCollector, WifiCollector};
use uplinkd_common::error::CollectError;
use uplinkd_common::{Config, Event, EventType, Member, MemberClass, MemberState, Score};
use uplinkd_controller::Controller;
use uplinkd_core::decision::DecisionInput;
use uplinkd_core::state_machine::{advance_member, MemberEvent};
use uplinkd_core::{decide, predictive_risk, rollback_decision, score, ClassWeights, TelemetryStore};
use uplinkd_rpc::{Command, RpcState};

use crate::discovery;
use crate::maintenance;

/// Number of samples pulled from the store as the scoring/prediction
/// window, matching the fixed-window mean the scorer documents.
const SCORE_WINDOW: usize = 20;

/// How many decision ticks a member that just failed verification is
/// excluded from challenger consideration (§8 scenario 6: "candidate is
/// penalized for one decision tick").
const ROLLBACK_PENALTY_TICKS: u32 = 1;

/// Reads a persisted override pin written by [`persist_override_pin`], if
/// the config opts into persistence. Called once before the first
/// discovery tick (§ Open Question decisions: "read back once at startup
/// before the first discovery tick").
async fn load_persisted_override(config: &Config) -> Option<String> {
    if !config.persist_override_pin {
        return None;
    }
    let contents = tokio::fs::read_to_string(&config.override_pin_path).await.ok()?;
    serde_json::from_str::<Option<String>>(&contents).ok().flatten()
}

async fn persist_override_pin(config: &Config, member: &Option<String>) {
    if !config.persist_override_pin {
        return;
    }
    let Ok(contents) = serde_json::to_string(member) else {
        return;
    };
    if let Err(e) = tokio::fs::write(&config.override_pin_path, contents).await {
        tracing::warn!(path = %config.override_pin_path, error = %e, "failed to persist override pin");
    }
}

fn collector_for(class: MemberClass) -> Arc<dyn Collector> {
    match class {
        MemberClass::Starlink => Arc::new(StarlinkCollector::default()),
        MemberClass::Cellular => Arc::new(CellularCollector::default()),
        MemberClass::Wifi => Arc::new(WifiCollector::default()),
        MemberClass::Lan | MemberClass::Generic => Arc::new(GenericCollector::default()),
    }
}

/// Bounded restart attempts before a component is given up on and
/// reported via `status` as `RunStatus::ComponentFailed` (§7).
const MAX_RESTART_ATTEMPTS: u32 = 5;

/// Supervises one tick-stream task, restarting it with exponential
/// backoff (starting at 1s, capped at 30s) if it exits via panic or
/// `Err` instead of a clean shutdown-triggered return. Gives up after
/// [`MAX_RESTART_ATTEMPTS`] and marks `name` failed in `status`.
async fn supervise<F, Fut>(
    shared: Arc<SharedState>,
    shutdown: tokio::sync::watch::Receiver<bool>,
    name: &'static str,
    task_fn: F,
) where
    F: Fn(Arc<SharedState>, tokio::sync::watch::Receiver<bool>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let mut backoff = Duration::from_secs(1);
    let max_backoff = Duration::from_secs(30);
    let mut attempts: u32 = 0;

    loop {
        if *shutdown.borrow() {
            return;
        }
        let handle = tokio::spawn(task_fn(shared.clone(), shutdown.clone()));
        match handle.await {
            Ok(()) => return,
            Err(join_err) => {
                if *shutdown.borrow() {
                    return;
                }
                attempts += 1;
                shared.rpc.bump_restarted_component();
                tracing::error!(
                    component = name,
                    attempt = attempts,
                    error = %join_err,
                    "component task exited unexpectedly"
                );
                if attempts > MAX_RESTART_ATTEMPTS {
                    tracing::error!(
                        component = name,
                        attempts,
                        "component exhausted restart attempts, marking failed"
                    );
                    shared.rpc.mark_component_failed(name);
                    return;
                }
                tracing::info!(component = name, backoff_s = backoff.as_secs(), "restarting component");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

struct SharedState {
    config: ArcSwap<Config>,
    store: Arc<TelemetryStore>,
    controller: Arc<dyn Controller>,
    members: ArcSwap<Vec<Member>>,
    rpc: RpcState,
    manual_override: ArcSwap<Option<String>>,
    recheck: Notify,
    collectors: Mutex<HashMap<String, Arc<dyn Collector>>>,
    transient_counts: Mutex<HashMap<String, u32>>,
    penalized: Mutex<HashMap<String, u32>>,
    config_path: Option<String>,
}

/// Runs every tick stream until `shutdown` is signalled, then waits up to
/// `config.shutdown_grace_ms` for in-flight work before returning.
#[allow(clippy::too_many_arguments)]
pub async fn run(
    initial_config: Config,
    config_path: Option<String>,
    store: Arc<TelemetryStore>,
    controller: Arc<dyn Controller>,
    rpc: RpcState,
    command_rx: mpsc::Receiver<Command>,
    log_reload: impl Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let shutdown_grace_ms = initial_config.shutdown_grace_ms;
    let persisted_override = load_persisted_override(&initial_config).await;
    if let Some(member) = &persisted_override {
        tracing::info!(member, "restored persisted override pin");
    }
    let shared = Arc::new(SharedState {
        config: ArcSwap::from_pointee(initial_config),
        store,
        controller,
        members: ArcSwap::from_pointee(Vec::new()),
        rpc,
        manual_override: ArcSwap::from_pointee(persisted_override),
        recheck: Notify::new(),
        collectors: Mutex::new(HashMap::new()),
        transient_counts: Mutex::new(HashMap::new()),
        penalized: Mutex::new(HashMap::new()),
        config_path,
    });

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(supervise(shared.clone(), shutdown.clone(), "discovery", discovery_task));
    tasks.spawn(supervise(shared.clone(), shutdown.clone(), "collection", collection_task));
    tasks.spawn(supervise(shared.clone(), shutdown.clone(), "decision", decision_task));
    tasks.spawn(supervise(shared.clone(), shutdown.clone(), "maintenance", maintenance_task));
    {
        // `command_rx` (not `Clone`) and `log_reload` are captured once and
        // shared across restarts via `Arc`, so a panicked command task can
        // be respawned against the same channel/reload handle.
        let command_rx = Arc::new(Mutex::new(command_rx));
        let log_reload: Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync> = Arc::new(log_reload);
        let task_fn = move |shared: Arc<SharedState>, shutdown: tokio::sync::watch::Receiver<bool>| {
            let command_rx = command_rx.clone();
            let log_reload = log_reload.clone();
            async move { command_task(shared, command_rx, log_reload, shutdown).await }
        };
        tasks.spawn(supervise(shared.clone(), shutdown.clone(), "command", task_fn));
    }

    shutdown.changed().await.ok();
    tracing::info!(grace_ms = shutdown_grace_ms, "shutdown signalled, draining tasks");

    let drain = tokio::time::timeout(Duration::from_millis(shutdown_grace_ms), async {
        while tasks.join_next().await.is_some() {}
    });
    if drain.await.is_err() {
        tracing::warn!("shutdown grace period elapsed with tasks still running; aborting");
        tasks.abort_all();
    }

    Ok(())
}

async fn discovery_task(shared: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        let config = shared.config.load();
        let interval_s = config.discovery_interval_s;
        drop(config);

        let previous = (**shared.members.load()).clone();
        let os_interfaces = discovery::list_os_interfaces();
        let config = shared.config.load();
        let current = discovery::discover(&config.members, &os_interfaces, &previous);
        drop(config);

        let dropped = discovery::dropped_since(&previous, &current);
        for member in &dropped {
            shared.store.remove_member(&member.name);
            shared
                .store
                .push_event(Event::new(EventType::Remove, "member removed").with_member(member.name.clone()));
        }
        let fresh: Vec<&Member> = current
            .iter()
            .filter(|m| !previous.iter().any(|p| p.name == m.name))
            .collect();
        for member in &fresh {
            shared.store.push_event(
                Event::new(EventType::Discover, "member discovered").with_member(member.name.clone()),
            );
            let mut collectors = shared.collectors.lock().await;
            collectors
                .entry(member.name.clone())
                .or_insert_with(|| collector_for(member.class));
        }
        {
            let mut collectors = shared.collectors.lock().await;
            collectors.retain(|name, _| current.iter().any(|m| &m.name == name));
        }

        shared.members.store(Arc::new(current.clone()));
        shared.rpc.set_members(current);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_s)) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn collection_task(shared: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        let config = shared.config.load_full();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let members = (**shared.members.load()).clone();
        let collectors = {
            let map = shared.collectors.lock().await;
            map.clone_with_arcs()
        };

        let mut handles = Vec::with_capacity(members.len());
        for member in members {
            let Some(collector) = collectors.get(&member.name).cloned() else {
                continue;
            };
            let deadline = poll_interval;
            handles.push(tokio::spawn(async move {
                let result = collector.collect(&member, deadline).await;
                (member, result)
            }));
        }

        for handle in handles {
            if let Ok((member, result)) = handle.await {
                handle_collect_result(&shared, &member, result).await;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shared.recheck.notified() => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn handle_collect_result(
    shared: &Arc<SharedState>,
    member: &Member,
    result: Result<uplinkd_common::Sample, CollectError>,
) {
    let config = shared.config.load();
    let degrade_after = 3u32;
    match result {
        Ok(sample) => {
            shared.store.insert_sample(&member.name, sample);
            let mut counts = shared.transient_counts.lock().await;
            counts.insert(member.name.clone(), 0);
            advance_member_state(shared, member, MemberEvent::SampleOk, 0, degrade_after).await;
        }
        Err(CollectError::Transient(detail)) => {
            let mut counts = shared.transient_counts.lock().await;
            let count = counts.entry(member.name.clone()).or_insert(0);
            *count += 1;
            let count = *count;
            drop(counts);
            shared.store.push_event(
                Event::new(EventType::Error, format!("transient collection error: {detail}"))
                    .with_member(member.name.clone()),
            );
            advance_member_state(shared, member, MemberEvent::TransientError, count, degrade_after).await;
        }
        Err(CollectError::Permanent(detail)) | Err(CollectError::Unsupported(detail)) => {
            shared.store.push_event(
                Event::new(EventType::Error, format!("permanent collection error: {detail}"))
                    .with_member(member.name.clone()),
            );
            advance_member_state(shared, member, MemberEvent::PermanentError, 0, degrade_after).await;
        }
    }
    drop(config);
}

/// Applies one [`MemberEvent`] to `member`'s lifecycle state in the
/// shared members list. Discovery owns creation/removal; this owns
/// in-place lifecycle transitions (§4.11).
async fn advance_member_state(
    shared: &Arc<SharedState>,
    member: &Member,
    event: MemberEvent,
    consecutive_transient: u32,
    degrade_after: u32,
) {
    let mut members = (**shared.members.load()).clone();
    if let Some(existing) = members.iter_mut().find(|m| m.name == member.name) {
        existing.state = advance_member(existing.state, event, consecutive_transient, degrade_after);
    }
    shared.members.store(Arc::new(members.clone()));
    shared.rpc.set_members(members);
}

fn is_fully_eligible(member: &Member, latest: Option<&uplinkd_common::Sample>, config: &Config) -> bool {
    if !member.is_administratively_eligible() {
        return false;
    }
    let Some(sample) = latest else {
        return false;
    };
    if !sample.connected {
        return false;
    }
    let staleness_limit = Duration::from_millis(config.poll_interval_ms.saturating_mul(3));
    let age = Utc::now().signed_duration_since(sample.timestamp);
    if age.to_std().map(|d| d > staleness_limit).unwrap_or(true) {
        return false;
    }
    if let Some(quota) = &member.metered {
        if config.data_cap_mode == uplinkd_common::DataCapMode::Emergency && quota.is_emergency() {
            return false;
        }
    }
    true
}

async fn decision_task(shared: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut last_switch_at: Option<chrono::DateTime<Utc>> = None;

    loop {
        let config = shared.config.load_full();
        let members = (**shared.members.load()).clone();

        let mut scores: HashMap<String, Score> = HashMap::new();
        let mut predictive_risks: HashMap<String, f64> = HashMap::new();
        let mut quotas: HashMap<String, uplinkd_common::QuotaDescriptor> = HashMap::new();
        let mut latest_samples: HashMap<String, uplinkd_common::Sample> = HashMap::new();

        for member in &members {
            let window = shared.store.window(&member.name, SCORE_WINDOW);
            if window.is_empty() {
                continue;
            }
            let member_cfg = config.members.iter().find(|c| c.name == member.name);
            let weights = member_cfg
                .and_then(|c| c.weight)
                .map(|w| ClassWeights::for_class(member.class).with_signal_override(w))
                .unwrap_or_else(|| ClassWeights::for_class(member.class));
            scores.insert(member.name.clone(), score(&window, member.class, &weights));
            if config.predictive {
                predictive_risks.insert(
                    member.name.clone(),
                    predictive_risk(&window, member.class, member.metered.as_ref()),
                );
            }
            if let Some(quota) = &member.metered {
                quotas.insert(member.name.clone(), *quota);
            }
            if let Some(last) = window.last() {
                latest_samples.insert(member.name.clone(), last.clone());
            }
        }

        let penalized = shared.penalized.lock().await.clone();
        let eligible: Vec<&Member> = members
            .iter()
            .filter(|m| !penalized.contains_key(&m.name))
            .filter(|m| is_fully_eligible(m, latest_samples.get(&m.name), &config))
            .collect();

        let incumbent = shared.controller.active_member();
        let manual_override = (**shared.manual_override.load()).clone();

        let input = DecisionInput {
            eligible,
            scores: &scores,
            incumbent: incumbent.as_deref(),
            last_switch_at,
            now: Utc::now(),
            config: &config,
            manual_override: manual_override.as_deref(),
            predictive_risks: &predictive_risks,
            quotas: &quotas,
        };

        if let Some(decision) = decide(&input) {
            shared.rpc.bump_decision_cycle();
            shared.rpc.set_scores(scores.clone());

            if decision.is_switch() {
                let target = members.iter().find(|m| Some(m.name.as_str()) == decision.elected_member.as_deref());
                let previous = members.iter().find(|m| Some(m.name.as_str()) == decision.previous_member.as_deref());

                if let Some(target) = target {
                    // The Decision is handed to the Controller regardless of
                    // backend (§4.6 step 6); `use_controller` only picks
                    // which `RouteApplier` the controller was built with
                    // (policy-engine delegation vs. direct route/metric
                    // manipulation), chosen once at startup in `main.rs`.
                    let verify_timeout = Duration::from_millis(config.verify_timeout_ms);
                    match shared.controller.apply(target, previous, verify_timeout).await {
                        Ok(()) => {
                            last_switch_at = Some(decision.timestamp);
                            shared.rpc.bump_switch_count();
                            shared.store.push_event(
                                Event::new(EventType::Switch, decision.reason.clone())
                                    .with_member(target.name.clone()),
                            );
                        }
                        Err(err) => {
                            shared.store.push_event(
                                Event::new(EventType::Error, format!("apply failed: {err}"))
                                    .with_member(target.name.clone()),
                            );
                            let mut penalized = shared.penalized.lock().await;
                            penalized.insert(target.name.clone(), ROLLBACK_PENALTY_TICKS);
                            drop(penalized);
                            let rollback = rollback_decision(
                                Utc::now(),
                                target.name.clone(),
                                previous.map(|m| m.name.clone()),
                                scores.clone(),
                            );
                            shared.store.push_event(
                                Event::new(EventType::Switch, rollback.reason).with_member(
                                    previous.map(|m| m.name.clone()).unwrap_or_default(),
                                ),
                            );
                        }
                    }
                }
            }
        } else {
            shared.rpc.bump_skipped_tick();
        }

        {
            let mut penalized = shared.penalized.lock().await;
            penalized.retain(|_, ticks| {
                *ticks -= 1;
                *ticks > 0
            });
        }

        let interval = Duration::from_millis(config.decision_interval_ms);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.recheck.notified() => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn maintenance_task(shared: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    loop {
        let config = shared.config.load_full();
        let issues = maintenance::run_checks(
            &shared.store,
            config.max_ram_mb,
            shared.config_path.as_deref(),
            1.0,
            50,
        )
        .await;
        maintenance::bump_pass_count();

        for issue in &issues {
            match issue.severity {
                maintenance::Severity::Critical => {
                    tracing::error!(target: "uplinkd::maintenance", detail = %issue.detail, "maintenance finding");
                }
                maintenance::Severity::Warning => {
                    tracing::warn!(target: "uplinkd::maintenance", detail = %issue.detail, "maintenance finding");
                }
                maintenance::Severity::Info => {
                    tracing::info!(target: "uplinkd::maintenance", detail = %issue.detail, "maintenance finding");
                }
            }
            shared.store.push_event(
                Event::new(EventType::Maintenance, issue.detail.clone()).with_data(
                    serde_json::to_value(issue).unwrap_or(serde_json::Value::Null),
                ),
            );
        }

        let interval = Duration::from_secs(config.maintenance_interval_s);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn command_task(
    shared: Arc<SharedState>,
    command_rx: Arc<Mutex<mpsc::Receiver<Command>>>,
    log_reload: Arc<dyn Fn(&str) -> Result<(), String> + Send + Sync>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            command = async { command_rx.lock().await.recv().await } => match command {
                Some(command) => command,
                None => return,
            },
            _ = shutdown.changed() => return,
        };
        match command {
            Command::Failover { member, reason, reply } => {
                let known = (**shared.members.load()).iter().any(|m| m.name == member);
                if !known {
                    let _ = reply.send(Err(uplinkd_common::rpc::RpcError::new(
                        uplinkd_common::rpc::ErrorCode::UnknownMember,
                        format!("unknown member: {member}"),
                    )));
                    continue;
                }
                shared.manual_override.store(Arc::new(Some(member.clone())));
                persist_override_pin(&shared.config.load_full(), &Some(member.clone())).await;
                shared.store.push_event(
                    Event::new(
                        EventType::Command,
                        reason.unwrap_or_else(|| "manual failover".to_string()),
                    )
                    .with_member(member),
                );
                shared.recheck.notify_waiters();
                let _ = reply.send(Ok(()));
            }
            Command::Restore { reply } => {
                shared.manual_override.store(Arc::new(None));
                persist_override_pin(&shared.config.load_full(), &None).await;
                shared
                    .store
                    .push_event(Event::new(EventType::Command, "override cleared, automatic mode restored"));
                shared.recheck.notify_waiters();
                let _ = reply.send(Ok(()));
            }
            Command::Recheck { reply } => {
                shared.recheck.notify_waiters();
                let _ = reply.send(());
            }
            Command::SetLog { level, reply } => match log_reload(&level) {
                Ok(()) => {
                    shared
                        .store
                        .push_event(Event::new(EventType::Command, format!("log level set to {level}")));
                    let _ = reply.send(Ok(()));
                }
                Err(detail) => {
                    let _ = reply.send(Err(uplinkd_common::rpc::RpcError::new(
                        uplinkd_common::rpc::ErrorCode::BadArgument,
                        detail,
                    )));
                }
            },
        }
    }
}

trait CollectorMapExt {
    fn clone_with_arcs(&self) -> HashMap<String, Arc<dyn Collector>>;
}

impl CollectorMapExt for HashMap<String, Arc<dyn Collector>> {
    fn clone_with_arcs(&self) -> HashMap<String, Arc<dyn Collector>> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uplinkd_common::ClassSample;

    fn sample_now(connected: bool) -> uplinkd_common::Sample {
        uplinkd_common::Sample::connected_ok(20.0, 0.0, 1.0, ClassSample::Generic)
            .tap_connected(connected)
    }

    trait TapConnected {
        fn tap_connected(self, connected: bool) -> Self;
    }

    impl TapConnected for uplinkd_common::Sample {
        fn tap_connected(mut self, connected: bool) -> Self {
            self.connected = connected;
            self
        }
    }

    fn member(name: &str, enabled: bool) -> Member {
        let mut m = Member::new(name, MemberClass::Generic, "eth0");
        m.enabled = enabled;
        m.state = MemberState::Eligible;
        m
    }

    #[test]
    fn administratively_disabled_member_is_never_eligible() {
        let m = member("wan0", false);
        let config = Config::default();
        assert!(!is_fully_eligible(&m, Some(&sample_now(true)), &config));
    }

    #[test]
    fn member_with_no_sample_is_not_eligible() {
        let m = member("wan0", true);
        let config = Config::default();
        assert!(!is_fully_eligible(&m, None, &config));
    }

    #[test]
    fn disconnected_sample_is_not_eligible() {
        let m = member("wan0", true);
        let config = Config::default();
        assert!(!is_fully_eligible(&m, Some(&sample_now(false)), &config));
    }

    #[test]
    fn fresh_connected_sample_is_eligible() {
        let m = member("wan0", true);
        let config = Config::default();
        assert!(is_fully_eligible(&m, Some(&sample_now(true)), &config));
    }

    #[test]
    fn stale_sample_is_not_eligible() {
        let m = member("wan0", true);
        let config = Config::default();
        let mut sample = sample_now(true);
        sample.timestamp = Utc::now() - chrono::Duration::milliseconds((config.poll_interval_ms * 10) as i64);
        assert!(!is_fully_eligible(&m, Some(&sample), &config));
    }

    #[tokio::test]
    async fn override_pin_round_trips_through_disk() {
        let dir = std::env::temp_dir().join(format!("uplinkd-test-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("override.json");

        let mut config = Config::default();
        config.persist_override_pin = true;
        config.override_pin_path = path.to_string_lossy().to_string();

        persist_override_pin(&config, &Some("wan1".to_string())).await;
        let restored = load_persisted_override(&config).await;
        assert_eq!(restored, Some("wan1".to_string()));

        persist_override_pin(&config, &None).await;
        let restored = load_persisted_override(&config).await;
        assert_eq!(restored, None);

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn override_pin_is_not_persisted_when_disabled() {
        let dir = std::env::temp_dir().join(format!("uplinkd-test-disabled-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("override.json");

        let mut config = Config::default();
        config.persist_override_pin = false;
        config.override_pin_path = path.to_string_lossy().to_string();

        persist_override_pin(&config, &Some("wan1".to_string())).await;
        assert!(tokio::fs::metadata(&path).await.is_err());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    struct NoopController;

    #[async_trait::async_trait]
    impl Controller for NoopController {
        async fn apply(
            &self,
            _target: &Member,
            _previous: Option<&Member>,
            _verify_timeout: Duration,
        ) -> Result<(), uplinkd_controller::ControllerError> {
            Ok(())
        }

        fn active_member(&self) -> Option<String> {
            None
        }

        fn phase(&self) -> uplinkd_controller::Phase {
            uplinkd_controller::Phase::None
        }
    }

    fn shared_state_for_test() -> Arc<SharedState> {
        let store = Arc::new(TelemetryStore::new(24));
        let controller: Arc<dyn Controller> = Arc::new(NoopController);
        let (bus, _command_rx) = uplinkd_rpc::CommandBus::new(8);
        let rpc = RpcState::new(store.clone(), Config::default(), controller.clone(), bus, "test");
        Arc::new(SharedState {
            config: ArcSwap::from_pointee(Config::default()),
            store,
            controller,
            members: ArcSwap::from_pointee(Vec::new()),
            rpc,
            manual_override: ArcSwap::from_pointee(None),
            recheck: Notify::new(),
            collectors: Mutex::new(HashMap::new()),
            transient_counts: Mutex::new(HashMap::new()),
            penalized: Mutex::new(HashMap::new()),
            config_path: None,
        })
    }

    /// A task that panics on its first call and returns cleanly afterwards,
    /// so `supervise` must restart it exactly once.
    fn panic_once_then_succeed(
        calls: Arc<AtomicU32>,
    ) -> impl Fn(Arc<SharedState>, tokio::sync::watch::Receiver<bool>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
           + Send
           + Sync
           + 'static {
        move |_shared, _shutdown| {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                if n == 0 {
                    panic!("simulated first-run failure");
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn supervise_restarts_a_panicking_task_and_counts_it() {
        let shared = shared_state_for_test();
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let calls = Arc::new(AtomicU32::new(0));

        supervise(shared.clone(), shutdown_rx, "test-component", panic_once_then_succeed(calls.clone())).await;

        assert_eq!(calls.load(Ordering::Relaxed), 2);
        let info = shared.rpc.dispatch(uplinkd_common::rpc::Request::Info).await.unwrap();
        match info {
            uplinkd_common::rpc::Response::Info(info) => assert_eq!(info.restarted_components, 1),
            _ => panic!("expected Info response"),
        }
        let status = shared.rpc.dispatch(uplinkd_common::rpc::Request::Status).await.unwrap();
        match status {
            uplinkd_common::rpc::Response::Status(s) => {
                assert_ne!(s.status, uplinkd_common::rpc::RunStatus::ComponentFailed)
            }
            _ => panic!("expected Status response"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn supervise_gives_up_after_max_restart_attempts() {
        let shared = shared_state_for_test();
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let calls = Arc::new(AtomicU32::new(0));
        let always_panics = {
            let calls = calls.clone();
            move |_shared: Arc<SharedState>, _shutdown: tokio::sync::watch::Receiver<bool>| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    panic!("simulated permanent failure");
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }
        };

        supervise(shared.clone(), shutdown_rx, "doomed-component", always_panics).await;

        assert_eq!(calls.load(Ordering::Relaxed), MAX_RESTART_ATTEMPTS + 1);
        let status = shared.rpc.dispatch(uplinkd_common::rpc::Request::Status).await.unwrap();
        match status {
            uplinkd_common::rpc::Response::Status(s) => {
                assert_eq!(s.status, uplinkd_common::rpc::RunStatus::ComponentFailed)
            }
            _ => panic!("expected Status response"),
        }
    }

    #[tokio::test]
    async fn supervise_does_not_restart_on_clean_shutdown() {
        let shared = shared_state_for_test();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let calls = Arc::new(AtomicU32::new(0));
        shutdown_tx.send(true).unwrap();

        let task_fn = {
            let calls = calls.clone();
            move |_shared: Arc<SharedState>, mut shutdown: tokio::sync::watch::Receiver<bool>| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    shutdown.changed().await.ok();
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }
        };

        supervise(shared.clone(), shutdown_rx, "shutting-down-component", task_fn).await;

        assert_eq!(calls.load(Ordering::Relaxed), 0);
        let info = shared.rpc.dispatch(uplinkd_common::rpc::Request::Info).await.unwrap();
        match info {
            uplinkd_common::rpc::Response::Info(info) => assert_eq!(info.restarted_components, 0),
            _ => panic!("expected Info response"),
        }
    }
}
