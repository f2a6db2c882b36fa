//! Process-wide registry of connection managers.
//!
//! Hands out at most one [`ConnectionManager`] per session. Consumers hold a
//! [`ConnectionLease`]; the manager is disconnected and dropped when the last
//! lease goes away.

use std::collections::HashMap;
use std::sync::Arc;

use agora_core::ids::SessionId;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::transport::{EndpointResolver, Transport};

struct Entry {
    manager: Arc<ConnectionManager>,
    leases: usize,
}

/// Reference-counted map from session to its connection manager.
pub struct ConnectionRegistry {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn EndpointResolver>,
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl ConnectionRegistry {
    /// Registry creating managers with the given transport and resolver.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn EndpointResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            transport,
            resolver,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// Configuration shared by all managers.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Lease the manager for `session_id`, creating it on first use.
    pub fn acquire(self: &Arc<Self>, session_id: &SessionId) -> ConnectionLease {
        let manager = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(session_id.clone()).or_insert_with(|| {
                debug!(session_id = %session_id, "creating connection manager");
                Entry {
                    manager: ConnectionManager::new(
                        self.config.clone(),
                        Arc::clone(&self.transport),
                        Arc::clone(&self.resolver),
                    ),
                    leases: 0,
                }
            });
            entry.leases += 1;
            Arc::clone(&entry.manager)
        };
        ConnectionLease {
            registry: Arc::clone(self),
            session_id: session_id.clone(),
            manager,
        }
    }

    /// Sessions with a live manager.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no manager is live.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Outstanding leases for `session_id`.
    pub fn lease_count(&self, session_id: &SessionId) -> usize {
        self.entries.lock().get(session_id).map_or(0, |e| e.leases)
    }

    fn release(&self, session_id: &SessionId) {
        let removed = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(session_id) else {
                return;
            };
            entry.leases = entry.leases.saturating_sub(1);
            if entry.leases > 0 {
                return;
            }
            entries.remove(session_id)
        };
        if let Some(entry) = removed {
            debug!(session_id = %session_id, "last lease released, tearing down connection");
            entry.manager.disconnect();
        }
    }
}

/// A consumer's handle on a session's connection manager.
pub struct ConnectionLease {
    registry: Arc<ConnectionRegistry>,
    session_id: SessionId,
    manager: Arc<ConnectionManager>,
}

impl ConnectionLease {
    /// The shared manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Leased session.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        self.registry.release(&self.session_id);
    }
}
