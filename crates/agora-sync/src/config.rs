//! Runtime configuration for the synchronization core.

use std::time::Duration;

use agora_settings::SyncSettings;

/// Timing and sizing knobs, in runtime units.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Heartbeat send interval.
    pub heartbeat_interval: Duration,
    /// Silence longer than `heartbeat_interval × multiplier` counts as closure.
    pub heartbeat_timeout_multiplier: u32,
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Upper bound for opening the channel.
    pub connect_timeout: Duration,
    /// Typing signal lifetime without a refresh.
    pub typing_window: Duration,
    /// Period of the typing sweep.
    pub typing_sweep_interval: Duration,
    /// Confidence at or above which a message is verified.
    pub confidence_threshold: f64,
    /// Upper bound for one verification call.
    pub verification_timeout: Duration,
    /// Match window for echoes without a correlation key.
    pub optimistic_match_window: Duration,
    /// Outbound frame buffer per channel.
    pub outbound_buffer: usize,
    /// Capacity of each lifecycle and frame subscription queue.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(s: &SyncSettings) -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            heartbeat_timeout_multiplier: s.heartbeat_timeout_multiplier.max(1),
            reconnect_delay: Duration::from_millis(s.reconnect_delay_ms),
            max_reconnect_attempts: s.max_reconnect_attempts,
            connect_timeout: Duration::from_millis(s.connect_timeout_ms),
            typing_window: Duration::from_millis(s.typing_window_ms),
            typing_sweep_interval: Duration::from_millis(s.typing_sweep_interval_ms.max(1)),
            confidence_threshold: s.confidence_threshold,
            verification_timeout: Duration::from_millis(s.verification_timeout_ms),
            optimistic_match_window: Duration::from_millis(s.optimistic_match_window_ms),
            outbound_buffer: s.outbound_buffer.max(1),
            event_buffer: s.event_buffer.max(1),
        }
    }
}

impl SyncConfig {
    /// Silence after which the channel is treated as closed.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval * self.heartbeat_timeout_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.typing_window, Duration::from_secs(3));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn zero_buffers_are_clamped() {
        let settings = SyncSettings {
            outbound_buffer: 0,
            event_buffer: 0,
            heartbeat_timeout_multiplier: 0,
            ..SyncSettings::default()
        };
        let config = SyncConfig::from(&settings);
        assert_eq!(config.outbound_buffer, 1);
        assert_eq!(config.event_buffer, 1);
        assert_eq!(config.heartbeat_timeout(), config.heartbeat_interval);
    }
}
