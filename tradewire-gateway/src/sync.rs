//! Post-authentication state synchronization.
//!
//! After an in-band authentication succeeds, the client gets one
//! `initial_state` event carrying a snapshot of its subject's state, so it
//! can render without an extra round trip to the HTTP API.
//!
//! The handshake uses [`StateSynchronizer::prepare`] and hands the event to
//! the registry together with `auth_success`, so no subject broadcast can
//! reach the client ahead of its snapshot.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::SubjectId;
use crate::broadcaster::Broadcaster;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::error::{GatewayError, SnapshotError};
use crate::message::OutboundEvent;

/// Produces a point-in-time snapshot of a subject's state.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Builds the snapshot for `subject`.
    ///
    /// # Errors
    ///
    /// Returns a [`SnapshotError`] if the state cannot be loaded.
    async fn snapshot(&self, subject: &SubjectId) -> Result<Value, SnapshotError>;
}

/// Provider returning an empty account/copy-trade/notification bundle.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySnapshotProvider;

#[async_trait]
impl SnapshotProvider for EmptySnapshotProvider {
    async fn snapshot(&self, _subject: &SubjectId) -> Result<Value, SnapshotError> {
        Ok(json!({
            "accounts": [],
            "copyRelationships": [],
            "notifications": [],
        }))
    }
}

/// Delivers the initial snapshot to a freshly authenticated connection.
#[derive(Clone)]
pub struct StateSynchronizer {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    provider: Arc<dyn SnapshotProvider>,
    timeout: Duration,
}

impl std::fmt::Debug for StateSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSynchronizer")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl StateSynchronizer {
    /// Creates a new synchronizer.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Broadcaster,
        provider: Arc<dyn SnapshotProvider>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            provider,
            timeout,
        }
    }

    /// Fetches the snapshot for `subject` as an `initial_state` event.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or exceeds the timeout.
    pub async fn fetch(&self, subject: &SubjectId) -> Result<OutboundEvent, GatewayError> {
        match tokio::time::timeout(self.timeout, self.provider.snapshot(subject)).await {
            Ok(snapshot) => Ok(OutboundEvent::initial_state(snapshot?)),
            Err(_) => Err(SnapshotError::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into()),
        }
    }

    /// Builds the `initial_state` event for `id` without sending it.
    ///
    /// Returns `None` if the connection is already gone or the fetch failed;
    /// failures are logged here.
    pub async fn prepare(&self, id: ConnectionId, subject: &SubjectId) -> Option<OutboundEvent> {
        if self.registry.by_connection(id).is_none() {
            debug!(conn_id = %id, "Connection gone before snapshot fetch");
            return None;
        }

        match self.fetch(subject).await {
            Ok(event) => {
                debug!(conn_id = %id, user_id = %subject, "Initial state prepared");
                Some(event)
            }
            Err(e) => {
                warn!(conn_id = %id, user_id = %subject, error = %e, code = e.error_code(), "State sync failed");
                None
            }
        }
    }

    /// Fetches the snapshot for `subject` and sends it to `id` only.
    ///
    /// A connection that closed before or during the fetch is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails or exceeds the timeout.
    pub async fn sync(&self, id: ConnectionId, subject: &SubjectId) -> Result<(), GatewayError> {
        if self.registry.by_connection(id).is_none() {
            debug!(conn_id = %id, "Connection gone before sync");
            return Ok(());
        }

        let event = self.fetch(subject).await?;
        if self.broadcaster.send(id, event).await {
            info!(conn_id = %id, user_id = %subject, "Initial state delivered");
        } else {
            debug!(conn_id = %id, "Connection gone before initial state delivery");
        }
        Ok(())
    }
}
