//! Settings types.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! overrides the keys it names.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgoraSettings {
    /// Client-side synchronization core.
    pub sync: SyncSettings,
    /// Reference server.
    pub server: ServerSettings,
    /// Reply and verification providers.
    pub providers: ProviderSettings,
    /// Durable store.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl AgoraSettings {
    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;
        if !(0.0..=1.0).contains(&sync.confidence_threshold) {
            return Err(SettingsError::InvalidValue(format!(
                "sync.confidenceThreshold must be within [0, 1], got {}",
                sync.confidence_threshold
            )));
        }
        if sync.heartbeat_timeout_multiplier == 0 {
            return Err(SettingsError::InvalidValue(
                "sync.heartbeatTimeoutMultiplier must be at least 1".into(),
            ));
        }
        if sync.heartbeat_interval_ms == 0 || sync.typing_sweep_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "sync intervals must be non-zero".into(),
            ));
        }
        if self.server.heartbeat_timeout_ms < self.server.heartbeat_interval_ms {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatTimeoutMs must not be shorter than server.heartbeatIntervalMs"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Synchronization core settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Heartbeat send interval.
    pub heartbeat_interval_ms: u64,
    /// Silence longer than `interval × multiplier` counts as closure.
    pub heartbeat_timeout_multiplier: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Reconnect budget before giving up.
    pub max_reconnect_attempts: u32,
    /// Upper bound for opening the channel.
    pub connect_timeout_ms: u64,
    /// How long a typing signal stays alive without a refresh.
    pub typing_window_ms: u64,
    /// Period of the typing sweep.
    pub typing_sweep_interval_ms: u64,
    /// Verification confidence at or above which a message is verified.
    pub confidence_threshold: f64,
    /// Upper bound for one verification call.
    pub verification_timeout_ms: u64,
    /// Window for matching an optimistic message to its echo without a correlation key.
    pub optimistic_match_window_ms: u64,
    /// Outbound frame buffer.
    pub outbound_buffer: usize,
    /// Connection event fan-out buffer.
    pub event_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_multiplier: 2,
            reconnect_delay_ms: 3_000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            typing_window_ms: 3_000,
            typing_sweep_interval_ms: 250,
            confidence_threshold: 0.7,
            verification_timeout_ms: 15_000,
            optimistic_match_window_ms: 10_000,
            outbound_buffer: 256,
            event_buffer: 256,
        }
    }
}

/// Reference server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Ping interval.
    pub heartbeat_interval_ms: u64,
    /// Drop clients silent for longer than this.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted frame in bytes.
    pub max_message_size: usize,
    /// Per-client outbound queue.
    pub client_buffer: usize,
    /// Pause between an expert's typing signal and its reply.
    pub reply_delay_ms: u64,
    /// Messages of history passed to the reply generator.
    pub history_window: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            max_message_size: 64 * 1024,
            client_buffer: 256,
            reply_delay_ms: 800,
            history_window: 20,
        }
    }
}

/// Reply and verification provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// Chat-completions style endpoint; canned replies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_endpoint: Option<String>,
    /// Model name sent to the reply endpoint.
    pub reply_model: String,
    /// Verification endpoint; the local heuristic verifier when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_endpoint: Option<String>,
    /// Name of the environment variable holding the provider API key.
    pub api_key_env: String,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            reply_endpoint: None,
            reply_model: "gpt-4o-mini".to_string(),
            verify_endpoint: None,
            api_key_env: "AGORA_API_KEY".to_string(),
            request_timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Durable store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite path (relative to `~/.agora`); in-memory when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: Some("agora.db".to_string()),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = AgoraSettings::default();
        assert_eq!(s.sync.reconnect_delay_ms, 3_000);
        assert_eq!(s.sync.max_reconnect_attempts, 5);
        assert_eq!(s.sync.typing_window_ms, 3_000);
        assert!((s.sync.confidence_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(s.server.port, 8080);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(AgoraSettings::default()).unwrap();
        assert_eq!(json["sync"]["maxReconnectAttempts"], 5);
        assert_eq!(json["server"]["heartbeatTimeoutMs"], 90_000);
        assert!(json["providers"].get("replyEndpoint").is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let s: AgoraSettings =
            serde_json::from_str(r#"{"sync":{"reconnectDelayMs":500}}"#).unwrap();
        assert_eq!(s.sync.reconnect_delay_ms, 500);
        assert_eq!(s.sync.max_reconnect_attempts, 5);
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut s = AgoraSettings::default();
        s.sync.confidence_threshold = 1.5;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn validate_rejects_zero_multiplier() {
        let mut s = AgoraSettings::default();
        s.sync.heartbeat_timeout_multiplier = 0;
        assert!(s.validate().is_err());
    }
}
