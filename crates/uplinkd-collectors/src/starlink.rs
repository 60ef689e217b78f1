//! Starlink dish collector (§4.2).
//!
//! Calls the dish's local management gRPC address (normally
//! `192.168.100.1:9200`) for status/diagnostics. The wire messages below
//! are a hand-authored subset of the dish's `Device.Handle` RPC — defined
//! directly with `prost::Message` derives rather than a `.proto` +
//! `build.rs` step, so this collector has no protoc dependency on a
//! constrained router toolchain.
//!
//! "Missing grpc client → fall back to generic + Permanent capability
//! downgrade": once the channel fails to connect, or the dish reports the
//! RPC unimplemented, this collector latches into a permanent fallback
//! onto [`GenericCollector`] until the next discovery cycle replaces it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use uplinkd_common::{ClassSample, CollectError, Member, Sample, StarlinkExt};

use crate::generic::GenericCollector;
use crate::Collector;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStatusRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusRequest {
    #[prost(message, optional, tag = "1")]
    pub get_status: Option<GetStatusRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeviceState {
    #[prost(uint64, tag = "1")]
    pub uptime_s: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObstructionStats {
    #[prost(double, tag = "1")]
    pub fraction_obstructed: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Alerts {
    #[prost(bool, tag = "1")]
    pub thermal_throttle: bool,
    #[prost(bool, tag = "2")]
    pub thermal_shutdown: bool,
    #[prost(bool, tag = "3")]
    pub reboot_ready: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DishGetStatusResponse {
    #[prost(message, optional, tag = "1")]
    pub device_state: Option<DeviceState>,
    #[prost(message, optional, tag = "2")]
    pub obstruction_stats: Option<ObstructionStats>,
    #[prost(message, optional, tag = "3")]
    pub alerts: Option<Alerts>,
    #[prost(double, tag = "4")]
    pub pop_ping_latency_ms: f64,
    #[prost(double, tag = "5")]
    pub pop_ping_drop_rate: f64,
    #[prost(double, tag = "6")]
    pub snr_db: f64,
    #[prost(uint32, tag = "7")]
    pub outages_count: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatusResponse {
    #[prost(message, optional, tag = "1")]
    pub dish_get_status: Option<DishGetStatusResponse>,
}

#[derive(Debug, Clone)]
pub struct StarlinkConfig {
    /// Dish management endpoint, e.g. `http://192.168.100.1:9200`.
    pub endpoint: String,
    pub connect_timeout: Duration,
}

impl Default for StarlinkConfig {
    fn default() -> Self {
        StarlinkConfig {
            endpoint: "http://192.168.100.1:9200".to_string(),
            connect_timeout: Duration::from_millis(1500),
        }
    }
}

/// Dish status collector with a latching generic fallback.
pub struct StarlinkCollector {
    config: StarlinkConfig,
    channel: tokio::sync::Mutex<Option<Channel>>,
    fallback: GenericCollector,
    downgraded: AtomicBool,
}

impl StarlinkCollector {
    pub fn new(config: StarlinkConfig) -> Self {
        StarlinkCollector {
            config,
            channel: tokio::sync::Mutex::new(None),
            fallback: GenericCollector::default(),
            downgraded: AtomicBool::new(false),
        }
    }

    /// True once this collector has permanently fallen back to the
    /// generic probe collector.
    pub fn is_downgraded(&self) -> bool {
        self.downgraded.load(Ordering::Relaxed)
    }

    async fn ensure_channel(&self) -> Result<Channel, CollectError> {
        let mut guard = self.channel.lock().await;
        if let Some(channel) = guard.as_ref() {
            return Ok(channel.clone());
        }
        let endpoint = Endpoint::from_shared(self.config.endpoint.clone())
            .map_err(|e| CollectError::Unsupported(format!("invalid dish endpoint: {e}")))?
            .connect_timeout(self.config.connect_timeout);
        let channel = endpoint.connect().await.map_err(|e| {
            CollectError::Unsupported(format!("no grpc client available for dish: {e}"))
        })?;
        *guard = Some(channel.clone());
        Ok(channel)
    }

    async fn call_status(&self, channel: Channel) -> Result<StatusResponse, tonic::Status> {
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unavailable(e.to_string()))?;
        let codec = tonic::codec::ProstCodec::default();
        let path = PathAndQuery::from_static("/SpaceX.API.Device.Device/Handle");
        let request = tonic::Request::new(StatusRequest {
            get_status: Some(GetStatusRequest {}),
        });
        grpc.unary(request, path, codec)
            .await
            .map(|resp| resp.into_inner())
    }
}

#[async_trait]
impl Collector for StarlinkCollector {
    async fn collect(&self, member: &Member, deadline: Duration) -> Result<Sample, CollectError> {
        if self.is_downgraded() {
            return self.fallback.collect(member, deadline).await;
        }

        let channel = match self.ensure_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(member = %member.name, error = %e, "{}", e.remediation());
                self.downgraded.store(true, Ordering::Relaxed);
                return self.fallback.collect(member, deadline).await;
            }
        };

        match tokio::time::timeout(deadline, self.call_status(channel)).await {
            Ok(Ok(status)) => Ok(sample_from_status(&status)),
            Ok(Err(status)) if status.code() == tonic::Code::Unimplemented => {
                tracing::warn!(member = %member.name, "dish rpc unimplemented, downgrading to generic");
                self.downgraded.store(true, Ordering::Relaxed);
                self.fallback.collect(member, deadline).await
            }
            Ok(Err(status)) => Err(CollectError::Transient(status.to_string())),
            Err(_) => Err(CollectError::Transient("dish status call timed out".into())),
        }
    }
}

fn sample_from_status(status: &StatusResponse) -> Sample {
    let dish = status.dish_get_status.clone().unwrap_or(DishGetStatusResponse {
        device_state: None,
        obstruction_stats: None,
        alerts: None,
        pop_ping_latency_ms: 0.0,
        pop_ping_drop_rate: 0.0,
        snr_db: 0.0,
        outages_count: 0,
    });
    let alerts = dish.alerts.unwrap_or(Alerts {
        thermal_throttle: false,
        thermal_shutdown: false,
        reboot_ready: false,
    });
    let obstruction_pct = dish
        .obstruction_stats
        .as_ref()
        .map(|o| (o.fraction_obstructed * 100.0).clamp(0.0, 100.0))
        .unwrap_or(0.0);
    let uptime_s = dish.device_state.as_ref().map(|s| s.uptime_s).unwrap_or(0);

    Sample::connected_ok(
        dish.pop_ping_latency_ms.max(0.0),
        (dish.pop_ping_drop_rate * 100.0).clamp(0.0, 100.0),
        0.0,
        ClassSample::Starlink(StarlinkExt {
            obstruction_pct,
            snr_db: dish.snr_db,
            reboot_ready: alerts.reboot_ready,
            thermal_throttle: alerts.thermal_throttle,
            thermal_shutdown: alerts.thermal_shutdown,
            outages_count: dish.outages_count,
            uptime_s,
        }),
    )
}
