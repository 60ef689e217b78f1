//! Transport-agnostic RPC dispatch plus optional HTTP bindings (§4.9, §6).
//!
//! [`dispatcher::RpcState::dispatch`] is the one core handler; everything
//! else in this crate is a thin binding onto it — [`bus::CommandBus`]
//! for the in-process command channel the runtime's consumer loop drains,
//! and [`http::router`] for the optional loopback HTTP surface.

pub mod bus;
pub mod dispatcher;
pub mod http;

pub use bus::{Command, CommandBus};
pub use dispatcher::RpcState;
