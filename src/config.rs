use std::time::Duration;

/// Heartbeat interval advertised in HELLO.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;
/// Silence after which an identified session is dropped.
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 60;
/// Outbound queue capacity per gateway session.
pub const DEFAULT_SESSION_QUEUE: usize = 100;
/// Sliding read deadline on voice connections.
pub const DEFAULT_VOICE_READ_TIMEOUT_SECS: u64 = 30;

/// Knobs shared by every gateway session.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub session_queue: usize,
    /// Advertised in VOICE_SERVER_UPDATE.
    pub voice_endpoint: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            heartbeat_timeout: Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECS),
            session_queue: DEFAULT_SESSION_QUEUE,
            voice_endpoint: "localhost:8081".to_string(),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub voice_port: u16,
    pub voice_read_timeout: Duration,
    pub gateway: GatewaySettings,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let port = env_parse("PORT").unwrap_or(8080);
        let voice_port = env_parse("GATEWAYSIM_VOICE_PORT").unwrap_or(8081);
        let voice_endpoint = std::env::var("GATEWAYSIM_VOICE_ENDPOINT")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| format!("localhost:{voice_port}"));

        let heartbeat_interval_ms = env_parse("GATEWAYSIM_HEARTBEAT_INTERVAL_MS")
            .filter(|ms: &u64| *ms > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
        let heartbeat_timeout_secs = env_parse("GATEWAYSIM_HEARTBEAT_TIMEOUT_SECS")
            .filter(|s: &u64| *s > 0)
            .unwrap_or(DEFAULT_HEARTBEAT_TIMEOUT_SECS);
        let session_queue = env_parse("GATEWAYSIM_SESSION_QUEUE")
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_SESSION_QUEUE);
        let voice_read_timeout_secs = env_parse("GATEWAYSIM_VOICE_READ_TIMEOUT_SECS")
            .filter(|s: &u64| *s > 0)
            .unwrap_or(DEFAULT_VOICE_READ_TIMEOUT_SECS);

        Self {
            port,
            voice_port,
            voice_read_timeout: Duration::from_secs(voice_read_timeout_secs),
            gateway: GatewaySettings {
                heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
                heartbeat_timeout: Duration::from_secs(heartbeat_timeout_secs),
                session_queue,
                voice_endpoint,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("PORT");
        std::env::remove_var("GATEWAYSIM_VOICE_PORT");
        std::env::remove_var("GATEWAYSIM_VOICE_ENDPOINT");
        std::env::remove_var("GATEWAYSIM_HEARTBEAT_INTERVAL_MS");
        std::env::remove_var("GATEWAYSIM_HEARTBEAT_TIMEOUT_SECS");
        std::env::remove_var("GATEWAYSIM_SESSION_QUEUE");
        std::env::remove_var("GATEWAYSIM_VOICE_READ_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.voice_port, 8081);
        assert_eq!(config.voice_read_timeout, Duration::from_secs(30));
        assert_eq!(config.gateway, GatewaySettings::default());
    }

    #[test]
    #[serial]
    fn test_heartbeat_interval_is_41250_ms() {
        clear_env();
        let config = Config::from_env();
        assert_eq!(config.gateway.heartbeat_interval.as_millis(), 41_250);
        assert_eq!(config.gateway.heartbeat_timeout.as_secs(), 60);
    }

    #[test]
    #[serial]
    fn test_voice_endpoint_follows_voice_port() {
        clear_env();
        std::env::set_var("GATEWAYSIM_VOICE_PORT", "9000");
        let config = Config::from_env();
        assert_eq!(config.voice_port, 9000);
        assert_eq!(config.gateway.voice_endpoint, "localhost:9000");
    }

    #[test]
    #[serial]
    fn test_explicit_voice_endpoint() {
        clear_env();
        std::env::set_var("GATEWAYSIM_VOICE_ENDPOINT", "voice.test:4000");
        let config = Config::from_env();
        assert_eq!(config.gateway.voice_endpoint, "voice.test:4000");
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back_to_defaults() {
        clear_env();
        std::env::set_var("PORT", "not_a_number");
        std::env::set_var("GATEWAYSIM_SESSION_QUEUE", "0");
        std::env::set_var("GATEWAYSIM_HEARTBEAT_INTERVAL_MS", "-5");
        let config = Config::from_env();
        assert_eq!(config.port, 8080);
        assert_eq!(config.gateway.session_queue, DEFAULT_SESSION_QUEUE);
        assert_eq!(
            config.gateway.heartbeat_interval,
            Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS)
        );
    }

    #[test]
    #[serial]
    fn test_liveness_overrides() {
        clear_env();
        std::env::set_var("GATEWAYSIM_HEARTBEAT_INTERVAL_MS", "500");
        std::env::set_var("GATEWAYSIM_HEARTBEAT_TIMEOUT_SECS", "2");
        std::env::set_var("GATEWAYSIM_VOICE_READ_TIMEOUT_SECS", "5");
        let config = Config::from_env();
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(config.gateway.heartbeat_timeout, Duration::from_secs(2));
        assert_eq!(config.voice_read_timeout, Duration::from_secs(5));
    }
}
