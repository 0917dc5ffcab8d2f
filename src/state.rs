use dashmap::DashMap;
use std::sync::Arc;

use crate::config::GatewaySettings;
use crate::gateway::hub::HubHandle;
use crate::models::voice::VoiceConnection;
use crate::voice::capture::AudioCapture;

#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub gateway: GatewaySettings,
    pub voice_connections: Arc<DashMap<String, VoiceConnection>>,
    pub capture: Arc<AudioCapture>,
}

impl AppState {
    pub fn new(hub: HubHandle, gateway: GatewaySettings) -> Self {
        Self {
            hub,
            gateway,
            voice_connections: Arc::new(DashMap::new()),
            capture: Arc::new(AudioCapture::new()),
        }
    }
}
