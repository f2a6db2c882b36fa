//! Typing-state tracker.
//!
//! Holds `(participant, expires_at)` pairs. It performs no I/O and owns no
//! timers: callers pass the current instant, and one periodic sweep removes
//! expired entries.

use std::collections::HashMap;
use std::time::Duration;

use agora_core::ids::ParticipantId;
use tokio::time::Instant;

/// Participants currently composing a reply.
#[derive(Debug)]
pub struct TypingTracker {
    window: Duration,
    expires: HashMap<ParticipantId, Instant>,
}

impl TypingTracker {
    /// Tracker whose signals live for `window` unless refreshed.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            expires: HashMap::new(),
        }
    }

    /// Record a typing start (or refresh). Returns `true` if `id` was idle.
    pub fn start(&mut self, id: ParticipantId, now: Instant) -> bool {
        self.expires.insert(id, now + self.window).is_none()
    }

    /// Record a typing end. Returns `true` if `id` was composing.
    pub fn stop(&mut self, id: &ParticipantId) -> bool {
        self.expires.remove(id).is_some()
    }

    /// Drop expired entries. Returns `true` if the composing set changed.
    pub fn sweep(&mut self, now: Instant) -> bool {
        let before = self.expires.len();
        self.expires.retain(|_, expires_at| *expires_at > now);
        self.expires.len() != before
    }

    /// Whether `id` is composing.
    pub fn is_composing(&self, id: &ParticipantId) -> bool {
        self.expires.contains_key(id)
    }

    /// Composing participants, sorted by id.
    pub fn composing(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.expires.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget every signal.
    pub fn clear(&mut self) {
        self.expires.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(3_000);

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    #[test]
    fn start_then_expire() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(WINDOW);
        assert!(tracker.start(pid("e1"), t0));
        assert!(!tracker.sweep(t0 + Duration::from_millis(2_999)));
        assert!(tracker.is_composing(&pid("e1")));
        assert!(tracker.sweep(t0 + WINDOW));
        assert!(tracker.composing().is_empty());
    }

    #[test]
    fn restart_refreshes_expiry() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(WINDOW);
        let _ = tracker.start(pid("e1"), t0);
        assert!(!tracker.start(pid("e1"), t0 + Duration::from_secs(2)));
        assert!(!tracker.sweep(t0 + Duration::from_secs(4)));
        assert!(tracker.sweep(t0 + Duration::from_secs(5)));
    }

    #[test]
    fn stop_removes_immediately() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(WINDOW);
        let _ = tracker.start(pid("e1"), t0);
        assert!(tracker.stop(&pid("e1")));
        assert!(!tracker.stop(&pid("e1")));
        assert!(!tracker.sweep(t0 + WINDOW));
    }

    #[test]
    fn composing_is_sorted() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(WINDOW);
        let _ = tracker.start(pid("zeta"), t0);
        let _ = tracker.start(pid("alpha"), t0);
        let _ = tracker.start(pid("mu"), t0);
        assert_eq!(tracker.composing(), vec![pid("alpha"), pid("mu"), pid("zeta")]);
        tracker.clear();
        assert!(tracker.composing().is_empty());
    }

    #[test]
    fn expiry_is_per_participant() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(WINDOW);
        let _ = tracker.start(pid("e1"), t0);
        let _ = tracker.start(pid("e2"), t0 + Duration::from_secs(2));
        assert!(tracker.sweep(t0 + Duration::from_secs(3)));
        assert_eq!(tracker.composing(), vec![pid("e2")]);
    }
}
