//! Shared types for the uplinkd control plane.
//!
//! These are the data-model types of the spec: `Member`, `Sample`,
//! `Score`, `Decision`, `Event`, the layered `Config`, and the RPC
//! request/response envelope. Collectors, the core scoring/decision
//! engine, the controller, and the RPC layer all depend on this crate
//! and nothing else in the workspace.

pub mod config;
pub mod decision;
pub mod error;
pub mod event;
pub mod ids;
pub mod member;
pub mod rpc;
pub mod sample;
pub mod score;

pub use config::{Config, DataCapMode, MemberConfig};
pub use decision::{Decision, TriggerReason};
pub use error::{CollectError, ConfigError};
pub use event::{Event, EventType};
pub use member::{Member, MemberClass, MemberState, QuotaDescriptor};
pub use sample::{CellularExt, ClassSample, Sample, StarlinkExt, WifiExt};
pub use score::{Score, Trend};
