use chrono::Utc;

use crate::models::voice::VoiceConnection;
use crate::state::AppState;

/// Add a freshly handshaken connection to the live table.
pub fn register_connection(
    state: &AppState,
    session_id: &str,
    guild_id: &str,
    channel_id: &str,
    user_id: &str,
) -> VoiceConnection {
    let connection = VoiceConnection {
        session_id: session_id.to_string(),
        guild_id: guild_id.to_string(),
        channel_id: channel_id.to_string(),
        user_id: user_id.to_string(),
        connected: true,
        last_packet_at: None,
    };
    state
        .voice_connections
        .insert(session_id.to_string(), connection.clone());
    connection
}

/// Stamp the arrival time of a packet on a connection.
pub fn touch_connection(state: &AppState, session_id: &str) {
    if let Some(mut entry) = state.voice_connections.get_mut(session_id) {
        entry.last_packet_at = Some(Utc::now());
    }
}

/// Remove a connection. Returns it with `connected` cleared, if it was present.
pub fn remove_connection(state: &AppState, session_id: &str) -> Option<VoiceConnection> {
    state
        .voice_connections
        .remove(session_id)
        .map(|(_, mut conn)| {
            conn.connected = false;
            conn
        })
}

/// Snapshot of all live connections, ordered by session id.
pub fn list_connections(state: &AppState) -> Vec<VoiceConnection> {
    let mut connections: Vec<VoiceConnection> = state
        .voice_connections
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    connections.sort_by(|a, b| a.session_id.cmp(&b.session_id));
    connections
}

/// All live connections in a given channel.
pub fn get_channel_connections(state: &AppState, channel_id: &str) -> Vec<VoiceConnection> {
    state
        .voice_connections
        .iter()
        .filter(|entry| entry.value().channel_id == channel_id)
        .map(|entry| entry.value().clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewaySettings;
    use crate::gateway::hub::Hub;
    use tokio_util::sync::CancellationToken;

    fn state() -> AppState {
        let (hub, _task) = Hub::spawn(41_250, CancellationToken::new());
        AppState::new(hub, GatewaySettings::default())
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let state = state();
        let conn = register_connection(&state, "s1", "g1", "vc-1", "u1");
        assert!(conn.connected);
        assert!(conn.last_packet_at.is_none());

        touch_connection(&state, "s1");
        assert!(list_connections(&state)[0].last_packet_at.is_some());

        let removed = remove_connection(&state, "s1").unwrap();
        assert!(!removed.connected);
        assert!(list_connections(&state).is_empty());
        assert!(remove_connection(&state, "s1").is_none());
    }

    #[tokio::test]
    async fn test_channel_filter_and_ordering() {
        let state = state();
        register_connection(&state, "s2", "g1", "vc-1", "u2");
        register_connection(&state, "s1", "g1", "vc-1", "u1");
        register_connection(&state, "s3", "g1", "vc-2", "u3");

        let ids: Vec<String> = list_connections(&state)
            .into_iter()
            .map(|c| c.session_id)
            .collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
        assert_eq!(get_channel_connections(&state, "vc-1").len(), 2);
        assert!(get_channel_connections(&state, "vc-9").is_empty());
    }
}
