//! Gateway hub: the single owner of the active session set.
//!
//! Registration, removal and broadcast are commands sent to one control-loop
//! task, so the session map is only ever touched from that task.

use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{close_code, Dispatch, ServerMessage};
use super::session::{EnqueueError, SessionHandle};

const COMMAND_QUEUE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub authenticated: bool,
}

/// The control loop has exited; the command was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gateway hub is not running")]
pub struct HubStopped;

enum Command {
    Register(SessionHandle, oneshot::Sender<()>),
    Unregister { session_id: String, code: u16 },
    Broadcast(Dispatch),
    Sessions(oneshot::Sender<Vec<SessionInfo>>),
}

/// Cloneable front door to the hub's control loop.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<Command>,
}

impl HubHandle {
    /// Returns once HELLO is on the session's queue, or the session has been
    /// torn down because it could not take it.
    pub async fn register(&self, session: SessionHandle) -> Result<(), HubStopped> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Register(session, tx)).await?;
        rx.await.map_err(|_| HubStopped)
    }

    /// Remove a session and close it with `code`. Unknown ids are ignored.
    pub async fn unregister(&self, session_id: &str, code: u16) -> Result<(), HubStopped> {
        self.send(Command::Unregister {
            session_id: session_id.to_string(),
            code,
        })
        .await
    }

    /// Deliver a dispatch to every authenticated session.
    pub async fn broadcast(&self, dispatch: Dispatch) -> Result<(), HubStopped> {
        self.send(Command::Broadcast(dispatch)).await
    }

    /// Snapshot of the active set, ordered by session id.
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>, HubStopped> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Sessions(tx)).await?;
        rx.await.map_err(|_| HubStopped)
    }

    async fn send(&self, command: Command) -> Result<(), HubStopped> {
        self.tx.send(command).await.map_err(|_| HubStopped)
    }
}

pub struct Hub {
    sessions: HashMap<String, SessionHandle>,
    heartbeat_interval_ms: u64,
}

impl Hub {
    /// Start the control loop. It runs until `shutdown` is cancelled or every
    /// handle has been dropped; sessions still open at that point are closed.
    pub fn spawn(
        heartbeat_interval_ms: u64,
        shutdown: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let hub = Hub {
            sessions: HashMap::new(),
            heartbeat_interval_ms,
        };
        let task = tokio::spawn(hub.run(rx, shutdown));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                Command::Register(session, ack) => {
                    self.register(session);
                    let _ = ack.send(());
                }
                Command::Unregister { session_id, code } => self.unregister(&session_id, code),
                Command::Broadcast(dispatch) => self.broadcast(dispatch),
                Command::Sessions(reply) => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        let open = self.sessions.len();
        for (_, session) in self.sessions.drain() {
            session.close(close_code::GOING_AWAY);
        }
        tracing::info!(sessions = open, "gateway hub stopped");
    }

    fn register(&mut self, session: SessionHandle) {
        let hello = ServerMessage::Hello {
            heartbeat_interval: self.heartbeat_interval_ms,
        };
        match session.enqueue(hello) {
            Ok(()) => {
                tracing::debug!(session_id = %session.session_id(), "session registered");
                self.sessions
                    .insert(session.session_id().to_string(), session);
            }
            Err(e) => {
                tracing::warn!(session_id = %session.session_id(), error = %e, "could not send hello");
                session.close(close_code::UNKNOWN_ERROR);
            }
        }
    }

    fn unregister(&mut self, session_id: &str, code: u16) {
        if let Some(session) = self.sessions.remove(session_id) {
            session.close(code);
            tracing::debug!(session_id, code, "session unregistered");
        }
    }

    fn broadcast(&mut self, dispatch: Dispatch) {
        let mut slow = Vec::new();
        let mut delivered = 0usize;
        for (id, session) in &self.sessions {
            if !session.is_authenticated() {
                continue;
            }
            match session.enqueue(ServerMessage::Dispatch(dispatch.clone())) {
                Ok(()) => delivered += 1,
                Err(EnqueueError::Full) => {
                    tracing::warn!(session_id = %id, "outbound queue full; disconnecting");
                    slow.push(id.clone());
                }
                Err(EnqueueError::Closed) => slow.push(id.clone()),
            }
        }
        for id in slow {
            self.unregister(&id, close_code::UNKNOWN_ERROR);
        }
        tracing::debug!(event = dispatch.event_type(), delivered, "broadcast");
    }

    fn snapshot(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .values()
            .map(|s| SessionInfo {
                session_id: s.session_id().to_string(),
                authenticated: s.is_authenticated(),
            })
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }
}
