//! The fixed world every identified session sees: one bot user and one
//! guild with a text channel, a voice channel and a single human member.

use crate::models::channel::{Channel, GUILD_TEXT, GUILD_VOICE};
use crate::models::guild::{Guild, UnavailableGuild};
use crate::models::member::Member;
use crate::models::user::User;

pub const BOT_USER_ID: &str = "100000000000000001";
pub const GUILD_ID: &str = "200000000000000001";
pub const TEXT_CHANNEL_ID: &str = "300000000000000001";
pub const VOICE_CHANNEL_ID: &str = "300000000000000002";
pub const MEMBER_USER_ID: &str = "100000000000000002";

pub fn bot_user() -> User {
    User {
        id: BOT_USER_ID.to_string(),
        username: "testbot".to_string(),
        discriminator: "0000".to_string(),
        global_name: None,
        avatar: None,
        bot: true,
    }
}

pub fn guild_stubs() -> Vec<UnavailableGuild> {
    vec![UnavailableGuild {
        id: GUILD_ID.to_string(),
        unavailable: true,
    }]
}

pub fn test_guild() -> Guild {
    let member = Member {
        user: User {
            id: MEMBER_USER_ID.to_string(),
            username: "tester".to_string(),
            discriminator: "0001".to_string(),
            global_name: Some("Tester".to_string()),
            avatar: None,
            bot: false,
        },
        nick: None,
        roles: Vec::new(),
        joined_at: "2024-01-01T00:00:00+00:00".to_string(),
        deaf: false,
        mute: false,
    };

    Guild {
        id: GUILD_ID.to_string(),
        name: "Test Guild".to_string(),
        owner_id: MEMBER_USER_ID.to_string(),
        member_count: 1,
        unavailable: false,
        channels: vec![
            Channel {
                id: TEXT_CHANNEL_ID.to_string(),
                channel_type: GUILD_TEXT,
                guild_id: Some(GUILD_ID.to_string()),
                name: Some("general".to_string()),
                position: Some(0),
                bitrate: None,
                user_limit: None,
            },
            Channel {
                id: VOICE_CHANNEL_ID.to_string(),
                channel_type: GUILD_VOICE,
                guild_id: Some(GUILD_ID.to_string()),
                name: Some("General".to_string()),
                position: Some(1),
                bitrate: Some(64000),
                user_limit: Some(0),
            },
        ],
        members: vec![member],
        voice_states: Vec::new(),
    }
}
