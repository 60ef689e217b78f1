//! In-process command bus: the single channel every external mutation
//! flows through (§4.9, §5 "Command channel: serializes all external
//! mutations"). Grounded on `strata_agent::AgentState`'s
//! `mpsc`-channel-to-a-single-consumer shape, generalized from
//! agent-command dispatch to RPC-command dispatch.
//!
//! RPC handlers never mutate core state directly — they build a
//! [`Command`], send it down the bus, and await the embedded oneshot
//! reply with a deadline. The single consumer (the runtime's main loop,
//! in `uplinkd::runtime`) is the only writer of override pin, manual log
//! level, and the forced-recheck flag, so the core never observes
//! concurrent mutation.

use tokio::sync::{mpsc, oneshot};
use uplinkd_common::rpc::RpcError;

/// One external mutation request, with its reply channel attached.
pub enum Command {
    Failover {
        member: String,
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), RpcError>>,
    },
    Restore {
        reply: oneshot::Sender<Result<(), RpcError>>,
    },
    Recheck {
        reply: oneshot::Sender<()>,
    },
    SetLog {
        level: String,
        reply: oneshot::Sender<Result<(), RpcError>>,
    },
}

/// Sending half of the bus, cloned into every RPC binding.
#[derive(Clone)]
pub struct CommandBus {
    tx: mpsc::Sender<Command>,
}

impl CommandBus {
    /// Creates the bus, returning the sender half (for RPC bindings) and
    /// the receiver half (for the runtime's single consumer loop).
    pub fn new(capacity: usize) -> (CommandBus, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (CommandBus { tx }, rx)
    }

    async fn send_and_await<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
        deadline: std::time::Duration,
    ) -> Result<T, RpcError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = build(reply_tx);
        self.tx.send(command).await.map_err(|_| {
            RpcError::new(
                uplinkd_common::rpc::ErrorCode::NotReady,
                "command bus consumer is not running",
            )
        })?;
        tokio::time::timeout(deadline, reply_rx)
            .await
            .map_err(|_| RpcError::new(uplinkd_common::rpc::ErrorCode::Internal, "command timed out"))?
            .map_err(|_| {
                RpcError::new(
                    uplinkd_common::rpc::ErrorCode::Internal,
                    "command consumer dropped the reply channel",
                )
            })
    }

    pub async fn failover(
        &self,
        member: String,
        reason: Option<String>,
        deadline: std::time::Duration,
    ) -> Result<(), RpcError> {
        self.send_and_await(
            |reply| Command::Failover {
                member,
                reason,
                reply,
            },
            deadline,
        )
        .await?
    }

    pub async fn restore(&self, deadline: std::time::Duration) -> Result<(), RpcError> {
        self.send_and_await(|reply| Command::Restore { reply }, deadline)
            .await?
    }

    pub async fn recheck(&self, deadline: std::time::Duration) -> Result<(), RpcError> {
        self.send_and_await(|reply| Command::Recheck { reply }, deadline)
            .await
    }

    pub async fn setlog(&self, level: String, deadline: std::time::Duration) -> Result<(), RpcError> {
        self.send_and_await(|reply| Command::SetLog { level, reply }, deadline)
            .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn failover_round_trips_through_a_consumer() {
        let (bus, mut rx) = CommandBus::new(8);
        let consumer = tokio::spawn(async move {
            if let Some(Command::Failover { member, reply, .. }) = rx.recv().await {
                assert_eq!(member, "wan0");
                let _ = reply.send(Ok(()));
            }
        });
        bus.failover("wan0".to_string(), None, Duration::from_millis(200))
            .await
            .unwrap();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn send_fails_fast_when_no_consumer() {
        let (bus, rx) = CommandBus::new(1);
        drop(rx);
        let err = bus.restore(Duration::from_millis(100)).await.unwrap_err();
        assert_eq!(err.code, uplinkd_common::rpc::ErrorCode::NotReady);
    }

    #[tokio::test]
    async fn timeout_when_consumer_never_replies() {
        let (bus, mut rx) = CommandBus::new(8);
        let _consumer = tokio::spawn(async move {
            // Hold the receiver open but never reply.
            let _cmd = rx.recv().await;
            std::future::pending::<()>().await;
        });
        let err = bus
            .recheck(Duration::from_millis(50))
            .await;
        // recheck's reply is () not Result, so a timeout surfaces as Err
        // from send_and_await's outer timeout mapping.
        assert!(err.is_err());
    }
}
