use serde::{Deserialize, Serialize};

pub const GUILD_TEXT: u8 = 0;
pub const GUILD_VOICE: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    #[serde(rename = "type")]
    pub channel_type: u8,
    pub guild_id: Option<String>,
    pub name: Option<String>,
    pub position: Option<i64>,
    pub bitrate: Option<i64>,
    pub user_limit: Option<i64>,
}

impl Channel {
    pub fn is_voice(&self) -> bool {
        self.channel_type == GUILD_VOICE
    }
}
