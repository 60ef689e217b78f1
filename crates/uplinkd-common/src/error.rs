//! Error taxonomy (§7).
//!
//! Each crate boundary uses one of these `thiserror` enums; `main.rs` and
//! other process-boundary code wrap them in `anyhow::Result`. The
//! decision engine never raises — it only consumes `CollectError`-derived
//! member state and `ApplyError`/`VerifyError`-derived controller state.

use thiserror::Error;

/// Rejected before affecting the runtime; the previous config snapshot is
/// retained.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Parse(String),
    #[error("invalid value for `{field}`: {detail}")]
    Invalid { field: String, detail: String },
    #[error("duplicate member name: {0}")]
    DuplicateMember(String),
}

/// Raised by a [`crate::Collector`](../uplinkd_collectors) implementation.
///
/// `Transient` is retried next tick and may degrade the member (§4.2).
/// `Permanent` disables the member until the next discovery tick.
/// `Unsupported` means this collector class cannot run on this member at
/// all (e.g. no gRPC client available for Starlink) and is treated like
/// `Permanent` by the caller, but logged distinctly for diagnosis.
#[derive(Debug, Error, Clone)]
pub enum CollectError {
    #[error("transient collection failure: {0}")]
    Transient(String),
    #[error("permanent collection failure: {0}")]
    Permanent(String),
    #[error("collector unsupported for this member: {0}")]
    Unsupported(String),
}

impl CollectError {
    pub fn remediation(&self) -> &'static str {
        match self {
            CollectError::Transient(_) => "will retry next collection tick",
            CollectError::Permanent(_) => "member disabled until next discovery cycle",
            CollectError::Unsupported(_) => "falling back to generic collector",
        }
    }
}

/// Raised by the controller while staging or committing a route change.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("target interface `{0}` is not up")]
    InterfaceDown(String),
    #[error("failed to stage change for `{member}`: {detail}")]
    Stage { member: String, detail: String },
    #[error("failed to commit change for `{member}`: {detail}")]
    Commit { member: String, detail: String },
}

/// Raised when post-apply verification fails; the controller rolls back
/// and the candidate member is penalized for one decision tick.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("route for `{0}` did not appear in the OS table within the verify timeout")]
    RouteMissing(String),
    #[error("interface carrier for `{0}` is down post-apply")]
    CarrierDown(String),
    #[error("canary probe via `{member}` failed: {detail}")]
    CanaryFailed { member: String, detail: String },
}

/// Caught at a component boundary, logged at error level, never crashes
/// the process. The runtime restarts the offending component with
/// exponential backoff (see `uplinkd::runtime`).
#[derive(Debug, Error)]
#[error("internal error in {component}: {detail}")]
pub struct InternalError {
    pub component: String,
    pub detail: String,
}
