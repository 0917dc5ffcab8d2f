use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceState {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    pub deaf: bool,
    pub mute: bool,
    pub self_deaf: bool,
    pub self_mute: bool,
    pub suppress: bool,
}

/// Sent after a voice join so the client knows where to open the voice transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: String,
    pub endpoint: String,
}

/// A live connection on the voice transport.
#[derive(Debug, Clone, Serialize)]
pub struct VoiceConnection {
    pub session_id: String,
    pub guild_id: String,
    pub channel_id: String,
    pub user_id: String,
    pub connected: bool,
    pub last_packet_at: Option<DateTime<Utc>>,
}
