use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::guild::{Guild, UnavailableGuild};
use crate::models::user::User;
use crate::models::voice::{VoiceServerUpdate, VoiceState};

/// Gateway API version reported in READY.
pub const GATEWAY_VERSION: u8 = 10;

/// Opcodes for gateway messages.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const PRESENCE_UPDATE: u8 = 3;
    pub const VOICE_STATE_UPDATE: u8 = 4;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const REQUEST_GUILD_MEMBERS: u8 = 8;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Websocket close codes sent when the server ends a session.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const SESSION_TIMED_OUT: u16 = 4009;
}

/// Gateway message envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid payload for opcode {op}: {source}")]
    Payload {
        op: u8,
        #[source]
        source: serde_json::Error,
    },
}

/// IDENTIFY payload data. Every field is optional on the wire so that a
/// missing token can be answered with INVALID_SESSION instead of a decode error.
#[derive(Debug, Default, Deserialize)]
pub struct IdentifyData {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub intents: Option<u64>,
    #[serde(default)]
    pub properties: Option<Value>,
}

impl IdentifyData {
    pub fn credential(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

/// PRESENCE_UPDATE (opcode 3) payload data.
#[derive(Debug, Deserialize)]
pub struct PresenceUpdateData {
    pub since: Option<u64>,
    #[serde(default)]
    pub activities: Vec<Value>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub afk: bool,
}

/// VOICE_STATE_UPDATE (opcode 4) payload data.
#[derive(Debug, Deserialize)]
pub struct VoiceStateUpdateData {
    pub guild_id: String,
    pub channel_id: Option<String>,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

impl VoiceStateUpdateData {
    /// The channel being joined; `None` means the client is leaving voice.
    pub fn joined_channel(&self) -> Option<&str> {
        self.channel_id.as_deref().filter(|c| !c.is_empty())
    }
}

/// Inbound frame decoded into a typed message.
#[derive(Debug)]
pub enum ClientMessage {
    Heartbeat(Option<u64>),
    Identify(IdentifyData),
    PresenceUpdate(PresenceUpdateData),
    VoiceStateUpdate(VoiceStateUpdateData),
    /// Known-but-unhandled or unknown opcode.
    Unhandled(u8),
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: GatewayFrame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: GatewayFrame) -> Result<Self, FrameError> {
        let op = frame.op;
        let payload = |source| FrameError::Payload { op, source };
        match op {
            opcode::HEARTBEAT => Ok(Self::Heartbeat(frame.d.as_u64())),
            // A malformed identify is still an identify attempt; it fails
            // credential validation downstream.
            opcode::IDENTIFY => Ok(Self::Identify(
                serde_json::from_value(frame.d).unwrap_or_default(),
            )),
            opcode::PRESENCE_UPDATE => serde_json::from_value(frame.d)
                .map(Self::PresenceUpdate)
                .map_err(payload),
            opcode::VOICE_STATE_UPDATE => serde_json::from_value(frame.d)
                .map(Self::VoiceStateUpdate)
                .map_err(payload),
            other => Ok(Self::Unhandled(other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyData {
    pub v: u8,
    pub user: User,
    pub guilds: Vec<UnavailableGuild>,
    pub session_id: String,
}

/// Opcode 0 events, each with its own typed payload.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Ready(ReadyData),
    GuildCreate(Guild),
    VoiceStateUpdate(VoiceState),
    VoiceServerUpdate(VoiceServerUpdate),
    /// Injected through the broadcast route.
    Custom { event_type: String, data: Value },
}

impl Dispatch {
    pub fn event_type(&self) -> &str {
        match self {
            Dispatch::Ready(_) => "READY",
            Dispatch::GuildCreate(_) => "GUILD_CREATE",
            Dispatch::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            Dispatch::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
            Dispatch::Custom { event_type, .. } => event_type,
        }
    }

    fn data(&self) -> Result<Value, serde_json::Error> {
        match self {
            Dispatch::Ready(d) => serde_json::to_value(d),
            Dispatch::GuildCreate(d) => serde_json::to_value(d),
            Dispatch::VoiceStateUpdate(d) => serde_json::to_value(d),
            Dispatch::VoiceServerUpdate(d) => serde_json::to_value(d),
            Dispatch::Custom { data, .. } => Ok(data.clone()),
        }
    }
}

/// Everything the server can put on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Hello { heartbeat_interval: u64 },
    Dispatch(Dispatch),
    HeartbeatAck,
    InvalidSession { resumable: bool },
}

impl ServerMessage {
    pub fn is_dispatch(&self) -> bool {
        matches!(self, ServerMessage::Dispatch(_))
    }

    /// Build the wire frame. `seq` is only attached to dispatches.
    pub fn to_frame(&self, seq: Option<u64>) -> Result<GatewayFrame, serde_json::Error> {
        let frame = match self {
            ServerMessage::Hello { heartbeat_interval } => GatewayFrame {
                op: opcode::HELLO,
                d: serde_json::json!({ "heartbeat_interval": heartbeat_interval }),
                s: None,
                t: None,
            },
            ServerMessage::Dispatch(dispatch) => GatewayFrame {
                op: opcode::DISPATCH,
                d: dispatch.data()?,
                s: seq,
                t: Some(dispatch.event_type().to_string()),
            },
            ServerMessage::HeartbeatAck => GatewayFrame {
                op: opcode::HEARTBEAT_ACK,
                d: Value::Null,
                s: None,
                t: None,
            },
            ServerMessage::InvalidSession { resumable } => GatewayFrame {
                op: opcode::INVALID_SESSION,
                d: Value::Bool(*resumable),
                s: None,
                t: None,
            },
        };
        Ok(frame)
    }
}
