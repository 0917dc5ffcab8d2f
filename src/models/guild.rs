use serde::{Deserialize, Serialize};

use super::channel::Channel;
use super::member::Member;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub member_count: i64,
    pub unavailable: bool,
    pub channels: Vec<Channel>,
    pub members: Vec<Member>,
    pub voice_states: Vec<super::voice::VoiceState>,
}

/// Placeholder entry listed in READY before the full guild arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
    pub unavailable: bool,
}
