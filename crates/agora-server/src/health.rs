//! `/health` endpoint: liveness plus the debate hub's live figures.

use std::time::Instant;

use serde::Serialize;

/// Whether the server still accepts debate traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingState {
    /// Accepting sockets and running reply rounds.
    Serving,
    /// Shutdown has begun; sockets are closing and rounds stop at the next expert.
    Draining,
}

/// Point-in-time figures gathered from the hub and its broadcast fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    /// Connected WebSocket clients.
    pub connections: usize,
    /// Sessions with at least one connected client.
    pub active_sessions: usize,
    /// Expert reply rounds currently running.
    pub reply_rounds: usize,
    /// User and expert messages newly persisted since start.
    pub messages_stored: u64,
    /// Retransmitted user messages that were echoed but not stored again.
    pub duplicates_ignored: u64,
    /// Outbound frames dropped for the clients still connected.
    pub frames_dropped: u64,
}

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Serving or draining.
    pub status: ServingState,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Hub figures, flattened into the top-level object.
    #[serde(flatten)]
    pub hub: HubStats,
}

/// Build a health response from the server start time and live hub figures.
pub fn health_check(start_time: Instant, draining: bool, hub: HubStats) -> HealthResponse {
    HealthResponse {
        status: if draining { ServingState::Draining } else { ServingState::Serving },
        uptime_secs: start_time.elapsed().as_secs(),
        hub,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_server_is_serving() {
        let resp = health_check(Instant::now(), false, HubStats::default());
        assert_eq!(resp.status, ServingState::Serving);
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn cancelled_server_reports_draining() {
        let resp = health_check(Instant::now(), true, HubStats::default());
        assert_eq!(resp.status, ServingState::Draining);
    }

    #[test]
    fn uptime_counts_from_start() {
        let start = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        assert!(health_check(start, false, HubStats::default()).uptime_secs >= 59);
    }

    #[test]
    fn hub_figures_are_flattened_in_camel_case() {
        let hub = HubStats {
            connections: 5,
            active_sessions: 3,
            reply_rounds: 1,
            messages_stored: 42,
            duplicates_ignored: 2,
            frames_dropped: 7,
        };
        let json = serde_json::to_value(health_check(Instant::now(), false, hub)).unwrap();
        assert_eq!(json["status"], "serving");
        assert_eq!(json["connections"], 5);
        assert_eq!(json["activeSessions"], 3);
        assert_eq!(json["replyRounds"], 1);
        assert_eq!(json["messagesStored"], 42);
        assert_eq!(json["duplicatesIgnored"], 2);
        assert_eq!(json["framesDropped"], 7);
        assert!(json["uptimeSecs"].is_u64());
        assert!(json.get("hub").is_none());
    }
}
