//! HTTP bindings (§6.2): `GET /metrics`, `GET /health*`, and a JSON POST
//! endpoint onto the same typed dispatcher every other binding uses.
//!
//! Grounded on `strata_control::api::metrics::handler` (Prometheus text
//! exposition, `# HELP`/`# TYPE` lines, per-entity gauge labels) and
//! `strata_common::metrics::render_prometheus`, relabelled from
//! `strata_link_*{sender_id,link_id,interface}` to
//! `uplinkd_member_*{member,class,interface}`.

use std::fmt::Write as _;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use uplinkd_common::rpc::{Request, Response, RunStatus};

use crate::dispatcher::RpcState;

/// Builds the router every binding mounts under its own prefix, if any.
pub fn router(state: RpcState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/health/detailed", get(health_detailed_handler))
        .route("/health/ready", get(health_ready_handler))
        .route("/health/live", get(health_live_handler))
        .route("/rpc", post(rpc_handler))
        .with_state(state)
}

/// `GET /metrics` — renders the current member snapshot plus latest
/// samples as Prometheus text exposition format.
async fn metrics_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let status = state.dispatch(Request::Status).await;
    let metrics = state.dispatch(Request::Metrics { member: None }).await;

    let members = match &status {
        Ok(Response::Status(s)) => s.members.clone(),
        _ => Vec::new(),
    };
    let samples: std::collections::HashMap<String, uplinkd_common::Sample> = match metrics {
        Ok(Response::Metrics(entries)) => entries.into_iter().collect(),
        _ => std::collections::HashMap::new(),
    };

    let mut out = String::with_capacity(4096);
    for member in &members {
        let labels = format!(
            "member=\"{}\",class=\"{}\",interface=\"{}\"",
            member.name, member.class, member.interface
        );
        let state_val = if member.state.is_electable() { 1 } else { 0 };
        writeln!(out, "uplinkd_member_state{{{labels}}} {state_val}").unwrap();

        if let Some(sample) = samples.get(&member.name) {
            writeln!(out, "uplinkd_member_latency_ms{{{labels}}} {:.3}", sample.latency_ms).unwrap();
            writeln!(out, "uplinkd_member_loss_pct{{{labels}}} {:.6}", sample.loss_pct).unwrap();
            writeln!(out, "uplinkd_member_jitter_ms{{{labels}}} {:.3}", sample.jitter_ms).unwrap();
            let connected_val = if sample.connected { 1 } else { 0 };
            writeln!(out, "uplinkd_member_connected{{{labels}}} {connected_val}").unwrap();
            if let uplinkd_common::ClassSample::Cellular(ext) = &sample.class_ext {
                writeln!(out, "uplinkd_member_signal{{{labels}}} {:.1}", ext.rsrp).unwrap();
            }
            if let uplinkd_common::ClassSample::Wifi(ext) = &sample.class_ext {
                writeln!(out, "uplinkd_member_signal{{{labels}}} {}", ext.rssi).unwrap();
            }
            if let uplinkd_common::ClassSample::Starlink(ext) = &sample.class_ext {
                writeln!(
                    out,
                    "uplinkd_member_obstruction_pct{{{labels}}} {:.3}",
                    ext.obstruction_pct
                )
                .unwrap();
            }
        }
    }

    writeln!(
        out,
        "# HELP uplinkd_members_total Total members currently discovered."
    )
    .unwrap();
    writeln!(out, "# TYPE uplinkd_members_total gauge").unwrap();
    writeln!(out, "uplinkd_members_total {}", members.len()).unwrap();

    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        out,
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    uptime_s: u64,
    version: String,
}

async fn health_handler(State(state): State<RpcState>) -> impl IntoResponse {
    match state.dispatch(Request::Status).await {
        Ok(Response::Status(s)) => Json(HealthResponse {
            status: match s.status {
                RunStatus::NoEligibleMembers | RunStatus::ComponentFailed => "unhealthy",
                _ => "ok",
            },
            timestamp: chrono::Utc::now(),
            uptime_s: s.uptime_s,
            version: s.version,
        })
        .into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[derive(Serialize)]
struct DetailedHealthResponse {
    status: StatusResponseView,
    info: uplinkd_common::rpc::InfoResponse,
    members: Vec<uplinkd_common::Member>,
}

#[derive(Serialize)]
struct StatusResponseView {
    status: RunStatus,
    active_member: Option<String>,
}

async fn health_detailed_handler(State(state): State<RpcState>) -> impl IntoResponse {
    let status = state.dispatch(Request::Status).await;
    let info = state.dispatch(Request::Info).await;
    match (status, info) {
        (Ok(Response::Status(s)), Ok(Response::Info(i))) => Json(DetailedHealthResponse {
            status: StatusResponseView {
                status: s.status,
                active_member: s.active_member,
            },
            info: i,
            members: s.members,
        })
        .into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// `GET /health/ready` — not ready until at least one member is eligible.
async fn health_ready_handler(State(state): State<RpcState>) -> impl IntoResponse {
    match state.dispatch(Request::Status).await {
        Ok(Response::Status(s))
            if !matches!(
                s.status,
                RunStatus::NoEligibleMembers | RunStatus::ComponentFailed
            ) =>
        {
            StatusCode::OK
        }
        Ok(Response::Status(_)) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `GET /health/live` — trivial: the process answering HTTP at all is
/// proof of liveness, no dependency on member state.
async fn health_live_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// `POST /rpc` — the same [`Request`]/[`Response`] envelope carried
/// in-process by [`crate::bus`], over JSON for external tooling.
async fn rpc_handler(
    State(state): State<RpcState>,
    Json(request): Json<Request>,
) -> impl IntoResponse {
    match state.dispatch(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            let status = match err.code {
                uplinkd_common::rpc::ErrorCode::BadArgument => StatusCode::BAD_REQUEST,
                uplinkd_common::rpc::ErrorCode::UnknownMember => StatusCode::NOT_FOUND,
                uplinkd_common::rpc::ErrorCode::Busy => StatusCode::CONFLICT,
                uplinkd_common::rpc::ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                uplinkd_common::rpc::ErrorCode::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(err)).into_response()
        }
    }
}
