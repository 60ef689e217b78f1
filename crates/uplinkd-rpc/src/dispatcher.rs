//! Transport-agnostic RPC core (§4.9, §6.1).
//!
//! One `dispatch()` handler answers every method in the RPC surface;
//! [`super::http`] is the only binding shipped here, but nothing in this
//! module knows about HTTP — matching the teacher's own design note
//! ("bindings are thin adapters onto the same typed request/response").
//! Read-only methods are answered directly against the shared state
//! below; mutating methods are handed to the [`crate::bus::CommandBus`]
//! so the runtime's single consumer applies them (§5).
//!
//! `RpcState` is a cheap-to-clone `Arc<Inner>` handle, the same shape as
//! `strata_control::state::AppState`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use uplinkd_common::rpc::{
    ErrorCode, HistoryEntry, InfoResponse, Request, Response, RpcError, RunStatus, StatusResponse,
};
use uplinkd_common::{Config, Member, Score};
use uplinkd_controller::Controller;
use uplinkd_core::TelemetryStore;

use crate::bus::CommandBus;

struct Inner {
    store: Arc<TelemetryStore>,
    config: ArcSwap<Config>,
    controller: Arc<dyn Controller>,
    members: ArcSwap<Vec<Member>>,
    scores: ArcSwap<HashMap<String, Score>>,
    bus: CommandBus,
    start_time: DateTime<Utc>,
    version: String,
    command_deadline: Duration,
    decision_cycles: AtomicU64,
    switch_count: AtomicU64,
    skipped_ticks: AtomicU64,
    restarted_components: AtomicU64,
    /// Names of components that exhausted their restart budget (§7).
    /// Non-empty makes `status` report `RunStatus::ComponentFailed`.
    failed_components: StdMutex<Vec<String>>,
}

/// Shared, cheaply-clonable handle passed to every RPC binding.
#[derive(Clone)]
pub struct RpcState {
    inner: Arc<Inner>,
}

impl RpcState {
    pub fn new(
        store: Arc<TelemetryStore>,
        config: Config,
        controller: Arc<dyn Controller>,
        bus: CommandBus,
        version: impl Into<String>,
    ) -> Self {
        RpcState {
            inner: Arc::new(Inner {
                store,
                config: ArcSwap::from_pointee(config),
                controller,
                members: ArcSwap::from_pointee(Vec::new()),
                scores: ArcSwap::from_pointee(HashMap::new()),
                bus,
                start_time: Utc::now(),
                version: version.into(),
                command_deadline: Duration::from_millis(2_000),
                decision_cycles: AtomicU64::new(0),
                switch_count: AtomicU64::new(0),
                skipped_ticks: AtomicU64::new(0),
                restarted_components: AtomicU64::new(0),
                failed_components: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Called by discovery each cycle to publish the latest member list.
    pub fn set_members(&self, members: Vec<Member>) {
        self.inner.members.store(Arc::new(members));
    }

    /// Called by the decision loop after each scoring pass.
    pub fn set_scores(&self, scores: HashMap<String, Score>) {
        self.inner.scores.store(Arc::new(scores));
    }

    /// Called whenever a hot-reloaded config snapshot is accepted.
    pub fn set_config(&self, config: Config) {
        self.inner.config.store(Arc::new(config));
    }

    pub fn bump_decision_cycle(&self) {
        self.inner.decision_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_switch_count(&self) {
        self.inner.switch_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_skipped_tick(&self) {
        self.inner.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_restarted_component(&self) {
        self.inner
            .restarted_components
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records that `name` exhausted its restart budget and gave up.
    /// Idempotent: calling it again for an already-failed component is a
    /// no-op.
    pub fn mark_component_failed(&self, name: &str) {
        let mut failed = self.inner.failed_components.lock().unwrap();
        if !failed.iter().any(|n| n == name) {
            failed.push(name.to_string());
        }
    }

    fn members(&self) -> Vec<Member> {
        (**self.inner.members.load()).clone()
    }

    fn uptime_s(&self) -> u64 {
        (Utc::now() - self.inner.start_time).num_seconds().max(0) as u64
    }

    /// Answers one RPC request against the current shared state,
    /// enqueueing mutating methods onto the command bus (§4.9: "commands
    /// that mutate runtime state are serialized through a single command
    /// channel").
    pub async fn dispatch(&self, request: Request) -> Result<Response, RpcError> {
        match request {
            Request::Status => Ok(Response::Status(self.status())),
            Request::Members => Ok(Response::Members(self.members())),
            Request::Metrics { member } => self.metrics(member),
            Request::History {
                member,
                limit,
                hours,
            } => self.history(&member, limit, hours),
            Request::Events {
                limit,
                hours,
                event_type,
            } => Ok(Response::Events(
                self.inner.store.recent_events(limit, hours, event_type),
            )),
            Request::Failover { member, reason } => self.failover(member, reason).await,
            Request::Restore => self.restore().await,
            Request::Recheck => self.recheck().await,
            Request::Setlog { level } => self.setlog(level).await,
            Request::Config => Ok(Response::Config(Box::new((**self.inner.config.load()).clone()))),
            Request::Info => Ok(Response::Info(self.info())),
        }
    }

    fn status(&self) -> StatusResponse {
        let members = self.members();
        let active_member = self.inner.controller.active_member();
        let any_eligible = members.iter().any(|m| m.is_administratively_eligible());
        let any_failed = !self.inner.failed_components.lock().unwrap().is_empty();
        let status = if any_failed {
            RunStatus::ComponentFailed
        } else if !any_eligible {
            RunStatus::NoEligibleMembers
        } else if active_member.is_some() {
            RunStatus::Ready
        } else {
            RunStatus::Degraded
        };
        StatusResponse {
            status,
            uptime_s: self.uptime_s(),
            version: self.inner.version.clone(),
            active_member,
            members,
        }
    }

    fn metrics(&self, member: Option<String>) -> Result<Response, RpcError> {
        match member {
            Some(name) => {
                let sample = self.inner.store.latest(&name).ok_or_else(|| {
                    RpcError::new(ErrorCode::UnknownMember, format!("unknown member: {name}"))
                })?;
                Ok(Response::Metrics(vec![(name, sample)]))
            }
            None => Ok(Response::Metrics(self.inner.store.all_latest())),
        }
    }

    fn history(
        &self,
        member: &str,
        limit: Option<usize>,
        hours: Option<f64>,
    ) -> Result<Response, RpcError> {
        if !self.members().iter().any(|m| m.name == member) {
            return Err(RpcError::new(
                ErrorCode::UnknownMember,
                format!("unknown member: {member}"),
            ));
        }
        let samples = self.inner.store.history(member, hours, limit);
        // The store only retains the current live score, not a score
        // history per sample, so every entry carries the same snapshot.
        let current_score = self.inner.scores.load().get(member).cloned();
        let entries = samples
            .into_iter()
            .map(|sample| HistoryEntry {
                sample,
                score: current_score,
            })
            .collect();
        Ok(Response::History(entries))
    }

    async fn failover(&self, member: String, reason: Option<String>) -> Result<Response, RpcError> {
        if !self.members().iter().any(|m| m.name == member) {
            return Err(RpcError::new(
                ErrorCode::UnknownMember,
                format!("unknown member: {member}"),
            ));
        }
        self.inner
            .bus
            .failover(member, reason, self.inner.command_deadline)
            .await?;
        Ok(Response::Ack)
    }

    async fn restore(&self) -> Result<Response, RpcError> {
        self.inner.bus.restore(self.inner.command_deadline).await?;
        Ok(Response::Ack)
    }

    async fn recheck(&self) -> Result<Response, RpcError> {
        self.inner.bus.recheck(self.inner.command_deadline).await?;
        Ok(Response::Ack)
    }

    async fn setlog(&self, level: String) -> Result<Response, RpcError> {
        const VALID: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !VALID.contains(&level.to_lowercase().as_str()) {
            return Err(RpcError::new(
                ErrorCode::BadArgument,
                format!("unknown log level: {level}"),
            ));
        }
        self.inner
            .bus
            .setlog(level, self.inner.command_deadline)
            .await?;
        Ok(Response::Ack)
    }

    fn info(&self) -> InfoResponse {
        InfoResponse {
            uptime_s: self.uptime_s(),
            memory_estimate_bytes: self.inner.store.approx_bytes(),
            decision_cycles: self.inner.decision_cycles.load(Ordering::Relaxed),
            switch_count: self.inner.switch_count.load(Ordering::Relaxed),
            skipped_ticks: self.inner.skipped_ticks.load(Ordering::Relaxed),
            restarted_components: self.inner.restarted_components.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uplinkd_common::{ClassSample, MemberClass, MemberState, Sample};

    struct NoopController;

    #[async_trait]
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
            Some("wan0".to_string())
        }

        fn phase(&self) -> uplinkd_controller::Phase {
            uplinkd_controller::Phase::Active
        }
    }

    fn test_state() -> (RpcState, tokio::sync::mpsc::Receiver<crate::bus::Command>) {
        let (bus, rx) = CommandBus::new(8);
        let state = RpcState::new(
            Arc::new(TelemetryStore::new(24)),
            Config::default(),
            Arc::new(NoopController),
            bus,
            "0.1.0-test",
        );
        (state, rx)
    }

    #[tokio::test]
    async fn status_reports_no_eligible_members_when_empty() {
        let (state, _rx) = test_state();
        let resp = state.dispatch(Request::Status).await.unwrap();
        match resp {
            Response::Status(s) => assert_eq!(s.status, RunStatus::NoEligibleMembers),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_ready_once_a_member_is_eligible_and_active() {
        let (state, _rx) = test_state();
        let mut member = Member::new("wan0", MemberClass::Generic, "wan0");
        member.state = MemberState::Eligible;
        state.set_members(vec![member]);
        let resp = state.dispatch(Request::Status).await.unwrap();
        match resp {
            Response::Status(s) => {
                assert_eq!(s.status, RunStatus::Ready);
                assert_eq!(s.active_member.as_deref(), Some("wan0"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn metrics_for_unknown_member_is_404() {
        let (state, _rx) = test_state();
        let err = state
            .dispatch(Request::Metrics {
                member: Some("ghost".to_string()),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownMember);
    }

    #[tokio::test]
    async fn metrics_for_known_member_returns_latest_sample() {
        let (state, _rx) = test_state();
        state.inner.store.insert_sample(
            "wan0",
            Sample::connected_ok(10.0, 0.0, 1.0, ClassSample::Generic),
        );
        let resp = state
            .dispatch(Request::Metrics {
                member: Some("wan0".to_string()),
            })
            .await
            .unwrap();
        match resp {
            Response::Metrics(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].0, "wan0");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failover_rejects_unknown_member() {
        let (state, _rx) = test_state();
        let err = state
            .dispatch(Request::Failover {
                member: "ghost".to_string(),
                reason: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownMember);
    }

    #[tokio::test]
    async fn failover_enqueues_command_for_known_member() {
        let (state, mut rx) = test_state();
        let mut member = Member::new("wan0", MemberClass::Generic, "wan0");
        member.state = MemberState::Eligible;
        state.set_members(vec![member]);

        let consumer = tokio::spawn(async move {
            if let Some(crate::bus::Command::Failover { member, reply, .. }) = rx.recv().await {
                assert_eq!(member, "wan0");
                let _ = reply.send(Ok(()));
            }
        });
        let resp = state
            .dispatch(Request::Failover {
                member: "wan0".to_string(),
                reason: Some("manual test".to_string()),
            })
            .await
            .unwrap();
        assert!(matches!(resp, Response::Ack));
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn setlog_rejects_unknown_level() {
        let (state, _rx) = test_state();
        let err = state
            .dispatch(Request::Setlog {
                level: "verbose".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArgument);
    }
}
