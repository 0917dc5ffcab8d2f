use rand::RngCore;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::events::{
    close_code, ClientMessage, Dispatch, IdentifyData, PresenceUpdateData, ReadyData,
    ServerMessage, VoiceStateUpdateData, GATEWAY_VERSION,
};
use crate::config::GatewaySettings;
use crate::fixtures;
use crate::models::voice::{VoiceServerUpdate, VoiceState};

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("outbound queue full")]
    Full,
    #[error("outbound queue closed")]
    Closed,
}

/// The hub's view of a session: its outbound queue plus the shared flags the
/// hub needs for broadcast filtering and teardown.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Arc<str>,
    tx: mpsc::Sender<ServerMessage>,
    authenticated: Arc<AtomicBool>,
    close_code: Arc<AtomicU16>,
    closed: CancellationToken,
}

impl SessionHandle {
    /// Create a handle with a bounded outbound queue. The receiver belongs to
    /// the session's writer task.
    pub fn new(session_id: &str, queue: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(queue.max(1));
        let handle = Self {
            session_id: Arc::from(session_id),
            tx,
            authenticated: Arc::new(AtomicBool::new(false)),
            close_code: Arc::new(AtomicU16::new(0)),
            closed: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Non-blocking send onto the outbound queue.
    pub fn enqueue(&self, msg: ServerMessage) -> Result<(), EnqueueError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::Release);
    }

    /// Close the session. The first close code recorded wins; later calls are no-ops.
    pub fn close(&self, code: u16) {
        let _ = self
            .close_code
            .compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire);
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close code to send to the client, once closed.
    pub fn close_code(&self) -> u16 {
        match self.close_code.load(Ordering::Acquire) {
            0 => close_code::NORMAL,
            code => code,
        }
    }
}

/// Reader-side protocol state of one gateway connection.
pub struct GatewaySession {
    handle: SessionHandle,
    settings: GatewaySettings,
    last_heartbeat: Instant,
    heartbeat_ticker: Option<Interval>,
}

impl GatewaySession {
    pub fn new(handle: SessionHandle, settings: GatewaySettings) -> Self {
        Self {
            handle,
            settings,
            last_heartbeat: Instant::now(),
            heartbeat_ticker: None,
        }
    }

    pub fn session_id(&self) -> &str {
        self.handle.session_id()
    }

    pub fn is_authenticated(&self) -> bool {
        self.handle.is_authenticated()
    }

    /// Route one inbound message. An error means the outbound queue rejected a
    /// reply and the session has to go.
    pub fn handle(&mut self, msg: ClientMessage) -> Result<(), EnqueueError> {
        match msg {
            ClientMessage::Identify(data) => self.identify(data),
            ClientMessage::Heartbeat(_) => self.heartbeat(),
            ClientMessage::VoiceStateUpdate(data) => self.voice_state_update(data),
            ClientMessage::PresenceUpdate(data) => {
                self.presence_update(data);
                Ok(())
            }
            ClientMessage::Unhandled(op) => {
                tracing::warn!(session_id = %self.session_id(), op, "ignoring unhandled opcode");
                Ok(())
            }
        }
    }

    fn identify(&mut self, data: IdentifyData) -> Result<(), EnqueueError> {
        if self.is_authenticated() {
            tracing::warn!(session_id = %self.session_id(), "ignoring identify on authenticated session");
            return Ok(());
        }

        if data.credential().is_none() {
            tracing::info!(session_id = %self.session_id(), "identify rejected: missing credential");
            return self
                .handle
                .enqueue(ServerMessage::InvalidSession { resumable: false });
        }

        let ready = ReadyData {
            v: GATEWAY_VERSION,
            user: fixtures::bot_user(),
            guilds: fixtures::guild_stubs(),
            session_id: self.session_id().to_string(),
        };
        self.handle
            .enqueue(ServerMessage::Dispatch(Dispatch::Ready(ready)))?;
        self.handle.enqueue(ServerMessage::Dispatch(Dispatch::GuildCreate(
            fixtures::test_guild(),
        )))?;

        // Flag flips after READY/GUILD_CREATE are queued so no broadcast can
        // take sequence 1 or 2.
        self.handle.mark_authenticated();
        self.last_heartbeat = Instant::now();
        let interval = self.settings.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat_ticker = Some(ticker);

        tracing::info!(
            session_id = %self.session_id(),
            intents = data.intents.unwrap_or(0),
            "session identified"
        );
        Ok(())
    }

    fn heartbeat(&mut self) -> Result<(), EnqueueError> {
        self.last_heartbeat = Instant::now();
        tracing::trace!(session_id = %self.session_id(), "heartbeat");
        self.handle.enqueue(ServerMessage::HeartbeatAck)
    }

    fn voice_state_update(&mut self, data: VoiceStateUpdateData) -> Result<(), EnqueueError> {
        if !self.is_authenticated() {
            tracing::debug!(session_id = %self.session_id(), "voice state update before identify");
            return Ok(());
        }

        let joined = data.joined_channel().map(str::to_string);
        let state = VoiceState {
            guild_id: data.guild_id.clone(),
            channel_id: joined.clone(),
            user_id: fixtures::BOT_USER_ID.to_string(),
            session_id: self.session_id().to_string(),
            deaf: false,
            mute: false,
            self_deaf: data.self_deaf,
            self_mute: data.self_mute,
            suppress: false,
        };
        self.handle
            .enqueue(ServerMessage::Dispatch(Dispatch::VoiceStateUpdate(state)))?;

        match joined {
            Some(channel_id) => {
                let update = VoiceServerUpdate {
                    token: voice_token(),
                    guild_id: data.guild_id,
                    endpoint: self.settings.voice_endpoint.clone(),
                };
                tracing::info!(
                    session_id = %self.session_id(),
                    channel_id = %channel_id,
                    "voice join"
                );
                self.handle
                    .enqueue(ServerMessage::Dispatch(Dispatch::VoiceServerUpdate(update)))
            }
            None => {
                tracing::info!(session_id = %self.session_id(), "voice leave");
                Ok(())
            }
        }
    }

    fn presence_update(&self, data: PresenceUpdateData) {
        tracing::info!(
            session_id = %self.session_id(),
            status = %data.status,
            afk = data.afk,
            activities = data.activities.len(),
            "presence update"
        );
    }

    /// Resolves on the next heartbeat check. Never resolves before identify.
    pub async fn heartbeat_tick(&mut self) {
        match self.heartbeat_ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    pub fn heartbeat_expired(&self) -> bool {
        self.is_authenticated() && self.last_heartbeat.elapsed() > self.settings.heartbeat_timeout
    }
}

/// Synthetic voice connection token: 16 random bytes, hex encoded.
fn voice_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    data_encoding::HEXLOWER.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> GatewaySettings {
        GatewaySettings {
            voice_endpoint: "voice.test:4000".to_string(),
            ..GatewaySettings::default()
        }
    }

    fn session(queue: usize) -> (GatewaySession, mpsc::Receiver<ServerMessage>) {
        let (handle, rx) = SessionHandle::new("sess-1", queue);
        (GatewaySession::new(handle, settings()), rx)
    }

    fn identify(token: Option<&str>) -> ClientMessage {
        ClientMessage::Identify(IdentifyData {
            token: token.map(str::to_string),
            ..Default::default()
        })
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn event_types(msgs: &[ServerMessage]) -> Vec<String> {
        msgs.iter()
            .map(|m| match m {
                ServerMessage::Dispatch(d) => d.event_type().to_string(),
                ServerMessage::Hello { .. } => "HELLO".to_string(),
                ServerMessage::HeartbeatAck => "ACK".to_string(),
                ServerMessage::InvalidSession { .. } => "INVALID".to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_identify_sends_ready_then_guild_create() {
        let (mut session, mut rx) = session(8);
        session.handle(identify(Some("Bot abc"))).unwrap();
        assert!(session.is_authenticated());

        let msgs = drain(&mut rx);
        assert_eq!(event_types(&msgs), vec!["READY", "GUILD_CREATE"]);
        match &msgs[0] {
            ServerMessage::Dispatch(Dispatch::Ready(ready)) => {
                assert_eq!(ready.session_id, "sess-1");
                assert!(ready.user.bot);
                assert_eq!(ready.guilds.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_credential_gets_invalid_session() {
        for token in [None, Some("")] {
            let (mut session, mut rx) = session(8);
            session.handle(identify(token)).unwrap();
            assert!(!session.is_authenticated());
            let msgs = drain(&mut rx);
            assert_eq!(msgs.len(), 1);
            assert!(matches!(
                msgs[0],
                ServerMessage::InvalidSession { resumable: false }
            ));
        }
    }

    #[tokio::test]
    async fn test_whitespace_token_is_a_credential() {
        let (mut session, mut rx) = session(8);
        session.handle(identify(Some("   "))).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(event_types(&drain(&mut rx)), vec!["READY", "GUILD_CREATE"]);
    }

    #[tokio::test]
    async fn test_retry_after_invalid_session() {
        let (mut session, mut rx) = session(8);
        session.handle(identify(None)).unwrap();
        session.handle(identify(Some("token"))).unwrap();
        assert!(session.is_authenticated());
        assert_eq!(
            event_types(&drain(&mut rx)),
            vec!["INVALID", "READY", "GUILD_CREATE"]
        );
    }

    #[tokio::test]
    async fn test_second_identify_is_ignored() {
        let (mut session, mut rx) = session(8);
        session.handle(identify(Some("token"))).unwrap();
        drain(&mut rx);
        session.handle(identify(Some("token"))).unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_each_heartbeat_is_acked_once() {
        let (mut session, mut rx) = session(8);
        session.handle(ClientMessage::Heartbeat(None)).unwrap();
        session.handle(ClientMessage::Heartbeat(Some(2))).unwrap();
        assert_eq!(event_types(&drain(&mut rx)), vec!["ACK", "ACK"]);
    }

    #[tokio::test]
    async fn test_voice_join_emits_state_and_server_update() {
        let (mut session, mut rx) = session(8);
        session.handle(identify(Some("token"))).unwrap();
        drain(&mut rx);

        let vsu = VoiceStateUpdateData {
            guild_id: fixtures::GUILD_ID.to_string(),
            channel_id: Some(fixtures::VOICE_CHANNEL_ID.to_string()),
            self_mute: false,
            self_deaf: true,
        };
        session.handle(ClientMessage::VoiceStateUpdate(vsu)).unwrap();

        let msgs = drain(&mut rx);
        assert_eq!(
            event_types(&msgs),
            vec!["VOICE_STATE_UPDATE", "VOICE_SERVER_UPDATE"]
        );
        match &msgs[1] {
            ServerMessage::Dispatch(Dispatch::VoiceServerUpdate(update)) => {
                assert_eq!(update.endpoint, "voice.test:4000");
                assert_eq!(update.guild_id, fixtures::GUILD_ID);
                assert_eq!(update.token.len(), 32);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_voice_leave_emits_only_state_update() {
        let (mut session, mut rx) = session(8);
        session.handle(identify(Some("token"))).unwrap();
        drain(&mut rx);

        for channel_id in [None, Some(String::new())] {
            let vsu = VoiceStateUpdateData {
                guild_id: fixtures::GUILD_ID.to_string(),
                channel_id,
                self_mute: false,
                self_deaf: false,
            };
            session.handle(ClientMessage::VoiceStateUpdate(vsu)).unwrap();
            let msgs = drain(&mut rx);
            assert_eq!(event_types(&msgs), vec!["VOICE_STATE_UPDATE"]);
        }
    }

    #[tokio::test]
    async fn test_voice_state_update_requires_identify() {
        let (mut session, mut rx) = session(8);
        let vsu = VoiceStateUpdateData {
            guild_id: fixtures::GUILD_ID.to_string(),
            channel_id: Some(fixtures::VOICE_CHANNEL_ID.to_string()),
            self_mute: false,
            self_deaf: false,
        };
        session.handle(ClientMessage::VoiceStateUpdate(vsu)).unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let (mut session, _rx) = session(1);
        session.handle(ClientMessage::Heartbeat(None)).unwrap();
        assert!(matches!(
            session.handle(ClientMessage::Heartbeat(None)),
            Err(EnqueueError::Full)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_expiry_only_after_identify() {
        let (handle, _rx) = SessionHandle::new("sess-1", 8);
        let mut session = GatewaySession::new(
            handle,
            GatewaySettings {
                heartbeat_interval: Duration::from_secs(1),
                heartbeat_timeout: Duration::from_secs(3),
                ..settings()
            },
        );
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!session.heartbeat_expired());

        session.handle(identify(Some("token"))).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!session.heartbeat_expired());

        session.handle(ClientMessage::Heartbeat(None)).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!session.heartbeat_expired());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(session.heartbeat_expired());
    }

    #[test]
    fn test_close_keeps_first_code() {
        let (handle, _rx) = SessionHandle::new("sess-1", 1);
        assert_eq!(handle.close_code(), close_code::NORMAL);
        handle.close(close_code::SESSION_TIMED_OUT);
        handle.close(close_code::UNKNOWN_ERROR);
        assert!(handle.is_closed());
        assert_eq!(handle.close_code(), close_code::SESSION_TIMED_OUT);
    }
}
