//! Transport-agnostic RPC request/response types (§6.1, §9).
//!
//! One typed enum per direction, dispatched by `uplinkd_rpc::dispatcher`
//! and carried verbatim by both bindings (in-process bus, HTTP/JSON).
//! Mirrors the `#[serde(tag = "...", content = "...")]` envelope style
//! used for the agent/control-plane protocol in the teacher codebase.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::decision::Decision;
use crate::event::{Event, EventType};
use crate::member::Member;
use crate::sample::Sample;

/// All methods the RPC surface accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    Status,
    Members,
    Metrics {
        member: Option<String>,
    },
    History {
        member: String,
        limit: Option<usize>,
        hours: Option<f64>,
    },
    Events {
        limit: Option<usize>,
        hours: Option<f64>,
        #[serde(rename = "type")]
        event_type: Option<EventType>,
    },
    Failover {
        member: String,
        reason: Option<String>,
    },
    Restore,
    Recheck,
    Setlog {
        level: String,
    },
    Config,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Starting,
    Ready,
    NoEligibleMembers,
    Degraded,
    /// A runtime component exhausted its bounded restart attempts and was
    /// given up on (§7: "restarting that component with exponential
    /// backoff, bounded attempts before marking it failed in `status`").
    ComponentFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: RunStatus,
    pub uptime_s: u64,
    pub version: String,
    pub active_member: Option<String>,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sample: Sample,
    pub score: Option<crate::score::Score>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub uptime_s: u64,
    pub memory_estimate_bytes: u64,
    pub decision_cycles: u64,
    pub switch_count: u64,
    pub skipped_ticks: u64,
    pub restarted_components: u64,
}

/// Error envelope for a failed RPC call (§6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadArgument = 400,
    UnknownMember = 404,
    Busy = 409,
    Internal = 500,
    NotReady = 503,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub error: String,
    pub code: ErrorCode,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        RpcError {
            error: message.into(),
            code,
        }
    }
}

/// All successful responses the dispatcher can produce. Errors are
/// returned out-of-band as `Result<Response, RpcError>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum Response {
    Status(StatusResponse),
    Members(Vec<Member>),
    Metrics(Vec<(String, Sample)>),
    History(Vec<HistoryEntry>),
    Events(Vec<Event>),
    Ack,
    Config(Box<Config>),
    Info(InfoResponse),
    Decision(Box<Decision>),
}
