//! Shared gateway state.
//!
//! One `GatewayState` owns the connection registry for the lifetime of the
//! gateway and hands clones of its collaborators to the HTTP layer.

use std::sync::Arc;
use tracing::info;

use crate::auth::{CredentialVerifier, JwtManager};
use crate::broadcaster::Broadcaster;
use crate::config::{GatewayConfig, WsConfig};
use crate::connection::ConnectionRegistry;
use crate::dispatcher::{ApplicationHandler, Dispatcher, EchoHandler};
use crate::handshake::Handshake;
use crate::sync::{EmptySnapshotProvider, SnapshotProvider, StateSynchronizer};

/// Shared gateway state.
pub struct GatewayState {
    /// Gateway configuration
    pub config: GatewayConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    dispatcher: Dispatcher,
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("path", &self.config.path)
            .field("connections", &self.registry.connection_count())
            .finish_non_exhaustive()
    }
}

impl GatewayState {
    /// Wires the gateway around the given collaborators.
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<dyn CredentialVerifier>,
        provider: Arc<dyn SnapshotProvider>,
        handler: Option<Arc<dyn ApplicationHandler>>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let ws = &config.websocket;
        let broadcaster = Broadcaster::new(registry.clone(), ws.send_timeout());
        let synchronizer = StateSynchronizer::new(
            registry.clone(),
            broadcaster.clone(),
            provider,
            ws.snapshot_timeout(),
        );
        let handshake = Handshake::new(
            registry.clone(),
            verifier,
            broadcaster.clone(),
            synchronizer,
            ws.verify_timeout(),
        )
        .with_sync_on_query_auth(ws.sync_on_query_auth);
        let dispatcher = Dispatcher::new(registry.clone(), broadcaster.clone(), handshake, handler);

        Self {
            config,
            registry,
            broadcaster,
            dispatcher,
        }
    }

    /// JWT verification, empty snapshots and the echo handler.
    #[must_use]
    pub fn with_defaults(config: GatewayConfig) -> Self {
        let verifier = Arc::new(JwtManager::new(&config.jwt));
        Self::new(
            config,
            verifier,
            Arc::new(EmptySnapshotProvider),
            Some(Arc::new(EchoHandler)),
        )
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the broadcaster for pushing events from outside the gateway.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Returns the inbound dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the WebSocket settings.
    #[must_use]
    pub fn ws_config(&self) -> &WsConfig {
        &self.config.websocket
    }

    /// Drops every connection. Their writers close the sockets.
    pub fn shutdown(&self) -> usize {
        let closed = self.registry.clear();
        info!(closed, "Gateway connections closed");
        closed
    }
}
