//! Server configuration.

use std::time::Duration;

use agora_settings::ServerSettings;

/// Runtime configuration for the reference server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` lets the OS pick.
    pub port: u16,
    /// Interval between server Ping frames.
    pub heartbeat_interval: Duration,
    /// Drop a client after this much silence.
    pub heartbeat_timeout: Duration,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Per-client outbound queue depth.
    pub client_buffer: usize,
    /// Pause between an expert's typing signal and its reply.
    pub reply_delay: Duration,
    /// Messages of history handed to the reply generator.
    pub history_window: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            heartbeat_interval: Duration::from_millis(settings.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(settings.heartbeat_timeout_ms),
            max_message_size: settings.max_message_size,
            client_buffer: settings.client_buffer.max(1),
            reply_delay: Duration::from_millis(settings.reply_delay_ms),
            history_window: settings.history_window,
        }
    }
}

impl ServerConfig {
    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_millisecond_settings() {
        let settings = ServerSettings {
            heartbeat_interval_ms: 1_500,
            reply_delay_ms: 0,
            ..ServerSettings::default()
        };
        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.heartbeat_interval, Duration::from_millis(1_500));
        assert_eq!(cfg.heartbeat_timeout, Duration::from_secs(90));
        assert_eq!(cfg.reply_delay, Duration::ZERO);
    }

    #[test]
    fn zero_buffer_is_clamped() {
        let settings = ServerSettings { client_buffer: 0, ..ServerSettings::default() };
        assert_eq!(ServerConfig::from(&settings).client_buffer, 1);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig { port: 9001, ..ServerConfig::default() };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:9001");
    }
}
