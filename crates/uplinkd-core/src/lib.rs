//! Telemetry store, scorer, predictor, and decision engine.
//!
//! This crate is the pure/core half of the daemon: everything in here
//! operates on data already collected by `uplinkd-collectors` and produces
//! decisions consumed by `uplinkd-controller`. Nothing here touches the
//! network, the OS route table, or a clock beyond what's passed in or
//! `chrono::Utc::now()` for timestamping.

pub mod decision;
pub mod predictor;
pub mod scorer;
pub mod state_machine;
pub mod telemetry;

pub use decision::{decide, rollback_decision, DecisionInput};
pub use predictor::predictive_risk;
pub use scorer::{score, ClassWeights};
pub use state_machine::{advance_active, advance_member, ActiveEvent, ActiveState, MemberEvent};
pub use telemetry::{SampleRing, TelemetryStore};
