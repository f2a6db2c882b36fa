//! Message ledger.
//!
//! Append-only, deduplicated and ordered by `(created_at, id)`. Local
//! optimistic entries are replaced in place by their server-confirmed copy,
//! matched by correlation key or, failing that, by sender, content and a
//! timestamp window. Ids superseded that way stay resolvable as aliases.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use agora_core::ids::MessageId;
use agora_core::model::{Message, Provenance, Rating, Source, VerificationStatus};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

type OrderKey = (DateTime<Utc>, MessageId);

/// Result of [`MessageLedger::append`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New entry.
    Accepted,
    /// The id is already present; nothing changed.
    Duplicate,
    /// A local optimistic entry was superseded by the server copy.
    Reconciled {
        /// Id the optimistic entry had.
        replaced: MessageId,
    },
}

/// A verification result addressed to one message.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    /// New status.
    pub status: VerificationStatus,
    /// Reported confidence.
    pub confidence: Option<f64>,
    /// Supporting sources; empty keeps the existing ones.
    pub sources: Vec<Source>,
}

/// Result of [`MessageLedger::apply_verification`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Status advanced.
    Applied,
    /// Would not advance; ignored.
    Rejected {
        /// Status the message keeps.
        current: VerificationStatus,
    },
    /// No such message.
    Unknown,
}

/// Ordered, deduplicated store of a session's messages.
#[derive(Debug)]
pub struct MessageLedger {
    entries: BTreeMap<OrderKey, Message>,
    keys: HashMap<MessageId, DateTime<Utc>>,
    aliases: HashMap<MessageId, MessageId>,
    match_window: chrono::Duration,
}

impl MessageLedger {
    /// Empty ledger matching uncorrelated echoes within `match_window`.
    pub fn new(match_window: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            keys: HashMap::new(),
            aliases: HashMap::new(),
            match_window: chrono::Duration::from_std(match_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(10)),
        }
    }

    /// Ledger seeded with stored messages.
    pub fn with_messages(
        match_window: Duration,
        messages: impl IntoIterator<Item = Message>,
    ) -> Self {
        let mut ledger = Self::new(match_window);
        for message in messages {
            let _ = ledger.append(message);
        }
        ledger
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.values()
    }

    /// Cloned entries in order.
    pub fn messages(&self) -> Vec<Message> {
        self.entries.values().cloned().collect()
    }

    /// Current id for `id`, following aliases.
    pub fn resolve(&self, id: &MessageId) -> Option<MessageId> {
        if self.keys.contains_key(id) {
            return Some(id.clone());
        }
        let mut current = self.aliases.get(id)?;
        // Aliases can chain when an entry is reconciled twice.
        while let Some(next) = self.aliases.get(current) {
            current = next;
        }
        self.keys.contains_key(current).then(|| current.clone())
    }

    /// Entry for `id` (aliases accepted).
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let id = self.resolve(id)?;
        let created_at = *self.keys.get(&id)?;
        self.entries.get(&(created_at, id))
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let id = self.resolve(id)?;
        let created_at = *self.keys.get(&id)?;
        self.entries.get_mut(&(created_at, id))
    }

    fn insert(&mut self, message: Message) {
        let _ = self.keys.insert(message.id.clone(), message.created_at);
        let _ = self
            .entries
            .insert((message.created_at, message.id.clone()), message);
    }

    fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let created_at = self.keys.remove(id)?;
        self.entries.remove(&(created_at, id.clone()))
    }

    fn pending_from<'a>(&'a self, incoming: &'a Message) -> impl Iterator<Item = &'a Message> + 'a {
        self.entries
            .values()
            .filter(move |m| m.is_pending() && m.sender_id == incoming.sender_id)
    }

    fn find_pending_match(&self, incoming: &Message) -> Option<MessageId> {
        if let Some(correlation) = &incoming.correlation_id {
            if let Some(found) = self
                .pending_from(incoming)
                .find(|m| m.correlation_id.as_ref() == Some(correlation))
            {
                return Some(found.id.clone());
            }
        }
        self.pending_from(incoming)
            .find(|m| {
                m.content == incoming.content
                    && (m.created_at - incoming.created_at).abs() <= self.match_window
            })
            .map(|m| m.id.clone())
    }

    /// Append a message.
    ///
    /// An id already present (directly or as an alias) is never overwritten.
    /// A server copy of a pending local entry with the same id only promotes
    /// its provenance and clears `unsent`.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if let Some(existing) = self.get_mut(&message.id) {
            if existing.is_pending() && !message.is_pending() {
                existing.provenance = Provenance::ServerConfirmed;
                existing.unsent = false;
                let replaced = existing.id.clone();
                debug!(message_id = %replaced, "optimistic message confirmed");
                return AppendOutcome::Reconciled { replaced };
            }
            debug!(message_id = %message.id, "duplicate message ignored");
            return AppendOutcome::Duplicate;
        }

        if !message.is_pending() {
            if let Some(local_id) = self.find_pending_match(&message) {
                if let Some(local) = self.remove(&local_id) {
                    let merged = Message {
                        created_at: local.created_at,
                        correlation_id: message.correlation_id.clone().or(local.correlation_id),
                        verification: local.verification,
                        confidence: local.confidence,
                        verification_failure: local.verification_failure,
                        rating: local.rating,
                        score: local.score,
                        unsent: false,
                        provenance: Provenance::ServerConfirmed,
                        ..message
                    };
                    debug!(
                        message_id = %merged.id,
                        replaced = %local_id,
                        "optimistic message reconciled"
                    );
                    let _ = self.aliases.insert(local_id.clone(), merged.id.clone());
                    self.insert(merged);
                    return AppendOutcome::Reconciled { replaced: local_id };
                }
            }
        }

        self.insert(message);
        AppendOutcome::Accepted
    }

    /// Apply a verification result, refusing any backward step.
    pub fn apply_verification(&mut self, id: &MessageId, verdict: Verdict) -> VerificationOutcome {
        let Some(message) = self.get_mut(id) else {
            debug!(message_id = %id, "verification for unknown message");
            return VerificationOutcome::Unknown;
        };
        if !message.verification.can_advance_to(verdict.status) {
            warn!(
                message_id = %message.id,
                current = %message.verification,
                attempted = %verdict.status,
                "rejected verification regression"
            );
            return VerificationOutcome::Rejected {
                current: message.verification,
            };
        }
        message.verification = verdict.status;
        if verdict.confidence.is_some() {
            message.confidence = verdict.confidence;
        }
        if !verdict.sources.is_empty() {
            message.sources = verdict.sources;
        }
        if verdict.status.is_terminal() {
            message.verification_failure = None;
        }
        VerificationOutcome::Applied
    }

    /// Move an unchecked message to `checking`.
    pub fn mark_checking(&mut self, id: &MessageId) -> bool {
        matches!(
            self.apply_verification(
                id,
                Verdict {
                    status: VerificationStatus::Checking,
                    confidence: None,
                    sources: Vec::new(),
                },
            ),
            VerificationOutcome::Applied
        )
    }

    /// Return a `checking` message to `unchecked` and record why.
    ///
    /// This is the only backward transition and exists for failed checks.
    pub fn release_verification(&mut self, id: &MessageId, reason: impl Into<String>) -> bool {
        let Some(message) = self.get_mut(id) else {
            return false;
        };
        if message.verification != VerificationStatus::Checking {
            return false;
        }
        message.verification = VerificationStatus::Unchecked;
        message.verification_failure = Some(reason.into());
        true
    }

    /// Record the local user's rating.
    pub fn set_rating(&mut self, id: &MessageId, rating: Rating) -> bool {
        let Some(message) = self.get_mut(id) else {
            return false;
        };
        message.rating = Some(rating);
        message.score = Some(rating.score());
        true
    }

    /// Clear the unsent tag once the frame was handed to the connection.
    pub fn mark_sent(&mut self, id: &MessageId) -> bool {
        match self.get_mut(id) {
            Some(message) if message.unsent => {
                message.unsent = false;
                true
            }
            _ => false,
        }
    }

    /// Entries still tagged unsent, in order.
    pub fn unsent(&self) -> Vec<Message> {
        self.entries.values().filter(|m| m.unsent).cloned().collect()
    }
}
