//! Telemetry store (§4.3): bounded per-series ring buffers plus the global
//! event log and memory accountant.

pub mod ring;
pub mod store;

pub use ring::SampleRing;
pub use store::TelemetryStore;
