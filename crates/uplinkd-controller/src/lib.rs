//! Apply / verify / rollback of the elected member onto the OS (§4.7).
//!
//! The decision engine never touches the OS; it hands a target [`Member`]
//! to a [`Controller`], which owns the only OS-writing code path in the
//! daemon. Two backends implement [`RouteApplier`] behind one capability —
//! [`policy::PolicyApplier`] (delegates to the router's multi-WAN policy
//! engine) and [`direct::DirectApplier`] (manipulates the default route /
//! metric directly) — matching the teacher's capability-trait-with-swappable-
//! backend shape (`strata_bonding::net::interface::LinkSender`).
//!
//! The currently-applied member is held in an `ArcSwap`, the same
//! lock-free-read pattern `rist_bonding_core::runtime::BondingRuntime` uses
//! for its metrics handle, repurposed here as the single authoritative
//! "active member" pointer (§5: "atomically swappable reference with a
//! compare-and-set in the Controller"). All applies are serialized through
//! a `tokio::sync::Mutex` apply-lock so two elections can never race onto
//! the OS at once.

pub mod direct;
pub mod policy;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uplinkd_common::error::{ApplyError, VerifyError};
use uplinkd_common::Member;

pub use direct::DirectApplier;
pub use policy::PolicyApplier;

/// Member-lifecycle phase of the active-member state machine (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    None,
    Electing,
    Active,
    Switching,
    Failing,
    RolledBack,
}

/// Snapshot of the controller's authoritative state, read by `status`/RPC.
#[derive(Debug, Clone)]
pub struct ActiveState {
    pub active_member: Option<String>,
    pub phase: Phase,
    pub since: DateTime<Utc>,
}

impl ActiveState {
    fn none() -> Self {
        ActiveState {
            active_member: None,
            phase: Phase::None,
            since: Utc::now(),
        }
    }
}

/// Error surfaced by [`Controller::apply`]. A `Verify` failure means the
/// controller already rolled back before returning — the caller's only
/// remaining job is to raise the `error` event and penalize the candidate
/// for one decision tick (§4.6, §8 scenario 6).
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("verification failed, rolled back: {0}")]
    Verify(#[source] VerifyError),
}

/// Backend that knows how to stage/commit/verify/rollback a route change
/// for one member. Implemented by [`policy::PolicyApplier`] and
/// [`direct::DirectApplier`].
#[async_trait]
pub trait RouteApplier: Send + Sync {
    /// Cheap liveness pre-check before touching anything.
    async fn interface_up(&self, member: &Member) -> bool;

    /// Stage the change without making it live yet.
    async fn stage(&self, member: &Member) -> Result<(), ApplyError>;

    /// Make the staged change live.
    async fn commit(&self, member: &Member) -> Result<(), ApplyError>;

    /// Read back the OS/policy-engine state and confirm the change took
    /// effect (route present, carrier up, optional canary probe),
    /// bounded by `timeout`.
    async fn verify(&self, member: &Member, timeout: Duration) -> Result<(), VerifyError>;

    /// Revert to `previous` (or to "no active member" if `None`).
    async fn rollback(&self, previous: Option<&Member>) -> Result<(), ApplyError>;
}

/// Applies elected members and exposes the currently-applied one as
/// authoritative state. `Send + Sync` and dyn-compatible (`async-trait`,
/// same dyn-dispatch idiom `uplinkd_collectors::Collector` uses) so the
/// runtime can hold it as `Arc<dyn Controller>`.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Run the full apply protocol for `target`, rolling back to
    /// `previous` on verification failure. Only one apply runs at a time;
    /// concurrent callers queue on the internal apply-lock.
    async fn apply(
        &self,
        target: &Member,
        previous: Option<&Member>,
        verify_timeout: Duration,
    ) -> Result<(), ControllerError>;

    /// Name of the member currently applied, per the controller's own
    /// cache (must agree with the OS — enforced by `verify`, not polled
    /// continuously).
    fn active_member(&self) -> Option<String>;

    fn phase(&self) -> Phase;
}

/// Default [`Controller`] implementation: apply-lock + `ArcSwap<ActiveState>`
/// around an injected [`RouteApplier`] backend.
pub struct MemberController {
    applier: Box<dyn RouteApplier>,
    state: ArcSwap<ActiveState>,
    apply_lock: tokio::sync::Mutex<()>,
}

impl MemberController {
    pub fn new(applier: Box<dyn RouteApplier>) -> Self {
        MemberController {
            applier,
            state: ArcSwap::from_pointee(ActiveState::none()),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn set_state(&self, active_member: Option<String>, phase: Phase) {
        self.state.store(Arc::new(ActiveState {
            active_member,
            phase,
            since: Utc::now(),
        }));
    }

    pub fn snapshot(&self) -> ActiveState {
        (**self.state.load()).clone()
    }
}

#[async_trait]
impl Controller for MemberController {
    async fn apply(
        &self,
        target: &Member,
        previous: Option<&Member>,
        verify_timeout: Duration,
    ) -> Result<(), ControllerError> {
        let _guard = self.apply_lock.lock().await;

        self.set_state(self.state.load().active_member.clone(), Phase::Electing);

        if !self.applier.interface_up(target).await {
            tracing::warn!(member = %target.name, interface = %target.interface, "target interface down, apply rejected");
            self.set_state(
                previous.map(|m| m.name.clone()),
                if previous.is_some() {
                    Phase::Active
                } else {
                    Phase::None
                },
            );
            return Err(ControllerError::Apply(ApplyError::InterfaceDown(
                target.interface.clone(),
            )));
        }

        self.set_state(self.state.load().active_member.clone(), Phase::Switching);

        if let Err(e) = self.applier.stage(target).await {
            self.set_state(
                previous.map(|m| m.name.clone()),
                if previous.is_some() {
                    Phase::Active
                } else {
                    Phase::None
                },
            );
            return Err(ControllerError::Apply(e));
        }

        if let Err(e) = self.applier.commit(target).await {
            self.set_state(previous.map(|m| m.name.clone()), Phase::Failing);
            let _ = self.applier.rollback(previous).await;
            self.set_state(
                previous.map(|m| m.name.clone()),
                if previous.is_some() {
                    Phase::Active
                } else {
                    Phase::None
                },
            );
            return Err(ControllerError::Apply(e));
        }

        match tokio::time::timeout(verify_timeout, self.applier.verify(target, verify_timeout))
            .await
        {
            Ok(Ok(())) => {
                self.set_state(Some(target.name.clone()), Phase::Active);
                Ok(())
            }
            Ok(Err(verify_err)) => {
                tracing::error!(member = %target.name, error = %verify_err, "apply verification failed, rolling back");
                self.set_state(self.state.load().active_member.clone(), Phase::Failing);
                let _ = self.applier.rollback(previous).await;
                self.set_state(
                    previous.map(|m| m.name.clone()),
                    Phase::RolledBack,
                );
                Err(ControllerError::Verify(verify_err))
            }
            Err(_) => {
                tracing::error!(member = %target.name, timeout_ms = verify_timeout.as_millis() as u64, "apply verification timed out, rolling back");
                self.set_state(self.state.load().active_member.clone(), Phase::Failing);
                let _ = self.applier.rollback(previous).await;
                self.set_state(
                    previous.map(|m| m.name.clone()),
                    Phase::RolledBack,
                );
                Err(ControllerError::Verify(VerifyError::RouteMissing(
                    target.name.clone(),
                )))
            }
        }
    }

    fn active_member(&self) -> Option<String> {
        self.state.load().active_member.clone()
    }

    fn phase(&self) -> Phase {
        self.state.load().phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uplinkd_common::MemberClass;

    struct FakeApplier {
        up: bool,
        verify_ok: bool,
        rollback_calls: AtomicUsize,
    }

    #[async_trait]
    impl RouteApplier for FakeApplier {
        async fn interface_up(&self, _member: &Member) -> bool {
            self.up
        }

        async fn stage(&self, _member: &Member) -> Result<(), ApplyError> {
            Ok(())
        }

        async fn commit(&self, _member: &Member) -> Result<(), ApplyError> {
            Ok(())
        }

        async fn verify(&self, member: &Member, _timeout: Duration) -> Result<(), VerifyError> {
            if self.verify_ok {
                Ok(())
            } else {
                Err(VerifyError::CarrierDown(member.name.clone()))
            }
        }

        async fn rollback(&self, _previous: Option<&Member>) -> Result<(), ApplyError> {
            self.rollback_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn member(name: &str) -> Member {
        Member::new(name, MemberClass::Generic, name)
    }

    #[tokio::test]
    async fn successful_apply_updates_active_member() {
        let controller = MemberController::new(Box::new(FakeApplier {
            up: true,
            verify_ok: true,
            rollback_calls: AtomicUsize::new(0),
        }));
        let target = member("b");
        controller
            .apply(&target, None, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(controller.active_member(), Some("b".to_string()));
        assert_eq!(controller.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn interface_down_rejects_without_touching_state() {
        let controller = MemberController::new(Box::new(FakeApplier {
            up: false,
            verify_ok: true,
            rollback_calls: AtomicUsize::new(0),
        }));
        let a = member("a");
        let b = member("b");
        controller
            .apply(&a, None, Duration::from_millis(100))
            .await
            .unwrap_err();
        let err = controller
            .apply(&b, Some(&a), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Apply(ApplyError::InterfaceDown(_))));
    }

    #[tokio::test]
    async fn verify_failure_rolls_back_to_previous() {
        let controller = MemberController::new(Box::new(FakeApplier {
            up: true,
            verify_ok: false,
            rollback_calls: AtomicUsize::new(0),
        }));
        let a = member("a");
        let b = member("b");

        // Elect `a` cleanly first using a separate controller-free path:
        // simulate by directly setting state via a successful apply on a
        // fresh controller that always verifies.
        let ok_controller = MemberController::new(Box::new(FakeApplier {
            up: true,
            verify_ok: true,
            rollback_calls: AtomicUsize::new(0),
        }));
        ok_controller
            .apply(&a, None, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(ok_controller.active_member(), Some("a".to_string()));

        let err = controller
            .apply(&b, Some(&a), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Verify(VerifyError::CarrierDown(_))));
        assert_eq!(controller.active_member(), Some("a".to_string()));
        assert_eq!(controller.phase(), Phase::RolledBack);
    }

    #[tokio::test]
    async fn applies_are_serialized() {
        let controller = Arc::new(MemberController::new(Box::new(FakeApplier {
            up: true,
            verify_ok: true,
            rollback_calls: AtomicUsize::new(0),
        })));
        let a = member("a");
        let b = member("b");
        let (r1, r2) = tokio::join!(
            controller.apply(&a, None, Duration::from_millis(100)),
            controller.apply(&b, None, Duration::from_millis(100))
        );
        assert!(r1.is_ok());
        assert!(r2.is_ok());
        // Whichever ran last under the apply-lock wins; both succeed.
        let active = controller.active_member();
        assert!(active == Some("a".to_string()) || active == Some("b".to_string()));
    }
}
