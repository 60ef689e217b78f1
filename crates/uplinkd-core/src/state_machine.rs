//! Member and active-member lifecycle state machines (§4.11).
//!
//! Pure transition functions — no I/O, no clock reads — so callers (the
//! collection scheduler for member lifecycle, the controller for
//! active-member lifecycle) can unit test their wiring against these
//! functions in isolation. Modeled on the teacher's `LinkPhase`: a small
//! closed enum plus a single `next()`-style transition function instead of
//! scattering `if`/`else` state logic through the caller.

use uplinkd_common::MemberState;

/// Inputs that can move a member between lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberEvent {
    /// A collector produced a successful sample.
    SampleOk,
    /// A collector raised `CollectError::Transient`.
    TransientError,
    /// A collector raised `CollectError::Permanent` or `Unsupported`.
    PermanentError,
    /// The member was administratively disabled (config `enabled = false`).
    Disabled,
    /// The member was re-enabled.
    Enabled,
    /// Absent from config or OS for one full discovery cycle.
    AbsentOneCycle,
}

/// Advances a member's lifecycle state by one event (§4.11).
///
/// `consecutive_transient` is the running count of transient errors
/// *including* the one this call represents, when `event` is
/// `TransientError`; the caller is responsible for maintaining that
/// counter and resetting it to zero on `SampleOk`. `degrade_after` is the
/// configured K consecutive-transient-errors threshold.
pub fn advance_member(
    current: MemberState,
    event: MemberEvent,
    consecutive_transient: u32,
    degrade_after: u32,
) -> MemberState {
    use MemberState::*;

    if event == MemberEvent::AbsentOneCycle {
        return Removed;
    }
    if current == Removed {
        // A removed member only leaves that state via fresh discovery,
        // which constructs a brand-new `Member`, not a transition.
        return Removed;
    }

    match event {
        MemberEvent::Disabled => Ineligible,
        MemberEvent::PermanentError => Ineligible,
        MemberEvent::Enabled => match current {
            Ineligible => Discovered,
            other => other,
        },
        MemberEvent::SampleOk => match current {
            Discovered | Probing => Eligible,
            Degraded => Eligible,
            Ineligible => Eligible,
            other @ (Eligible | Removed) => other,
        },
        MemberEvent::TransientError => match current {
            Discovered => Probing,
            Probing => Probing,
            Eligible | Degraded => {
                if consecutive_transient >= degrade_after {
                    Degraded
                } else {
                    current
                }
            }
            other @ (Ineligible | Removed) => other,
        },
        MemberEvent::AbsentOneCycle => unreachable!("handled above"),
    }
}

/// Lifecycle of the single active (elected) member, owned by the
/// controller (§4.7, §4.11). `Switching` holds the apply lock: no new
/// `Decision` takes effect until the controller resolves to `Active` or
/// `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveState {
    None,
    Electing,
    Active,
    Switching,
    Failing,
    RolledBack,
}

impl ActiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActiveState::None => "none",
            ActiveState::Electing => "electing",
            ActiveState::Active => "active",
            ActiveState::Switching => "switching",
            ActiveState::Failing => "failing",
            ActiveState::RolledBack => "rolled_back",
        }
    }

    /// Whether a new Decision may begin applying right now. `false` while
    /// an apply is already in flight (`Switching`/`Failing`) — the
    /// controller's apply-lock backs this, this is just the state-machine
    /// view of the same invariant.
    pub fn accepts_new_decision(&self) -> bool {
        !matches!(self, ActiveState::Switching | ActiveState::Failing)
    }
}

/// Events driving the active-member state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveEvent {
    /// Decision engine elected a member; controller begins applying.
    DecisionElected,
    /// Apply + verify succeeded.
    ApplySucceeded,
    /// Verify failed within `verify_timeout`; rollback started.
    VerifyFailed,
    /// Rollback to the previous member completed.
    RollbackComplete,
}

pub fn advance_active(current: ActiveState, event: ActiveEvent) -> ActiveState {
    use ActiveEvent::*;
    use ActiveState::*;

    match (current, event) {
        (None, DecisionElected) => Electing,
        (Electing, ApplySucceeded) => Active,
        (Electing, VerifyFailed) => Failing,
        (Active, DecisionElected) => Switching,
        (Switching, ApplySucceeded) => Active,
        (Switching, VerifyFailed) => Failing,
        (Failing, RollbackComplete) => RolledBack,
        (RolledBack, DecisionElected) => Electing,
        (other, _) => other,
    }
}
