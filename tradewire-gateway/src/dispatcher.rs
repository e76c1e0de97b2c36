//! Inbound message routing.
//!
//! Every text frame goes through [`Dispatcher::dispatch`]. The dispatcher
//! only interprets `authenticate`; everything else goes to the registered
//! [`ApplicationHandler`], whatever the connection's authentication state.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::SubjectId;
use crate::broadcaster::Broadcaster;
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::handshake::Handshake;
use crate::message::{ApplicationMessage, InboundMessage, OutboundEvent};

/// What the handler knows about the sender of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContext {
    /// Sending connection
    pub connection_id: ConnectionId,
    /// Bound subject, if authenticated
    pub subject: Option<SubjectId>,
    /// Whether the connection has authenticated
    pub authenticated: bool,
}

/// Result of handling an application message.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Send this event back to the sender
    Reply(OutboundEvent),
    /// Handled, nothing to send
    Handled,
    /// Not recognized; the sender gets an `unhandled` acknowledgment
    Unhandled,
}

/// Handles application messages.
#[async_trait]
pub trait ApplicationHandler: Send + Sync {
    /// Handles one message from `ctx.connection_id`.
    async fn handle(&self, ctx: &MessageContext, message: ApplicationMessage) -> HandlerOutcome;
}

/// Replies to every message with an `echo` of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl ApplicationHandler for EchoHandler {
    async fn handle(&self, _ctx: &MessageContext, message: ApplicationMessage) -> HandlerOutcome {
        HandlerOutcome::Reply(OutboundEvent::echo(message.body))
    }
}

/// Routes parsed frames to the handshake or the application handler.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    handshake: Handshake,
    handler: Option<Arc<dyn ApplicationHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handshake", &self.handshake)
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Broadcaster,
        handshake: Handshake,
        handler: Option<Arc<dyn ApplicationHandler>>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            handshake,
            handler,
        }
    }

    /// Returns the handshake used for `authenticate` messages.
    #[must_use]
    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Processes one text frame from `id`.
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    pub async fn dispatch(&self, id: ConnectionId, text: &str) {
        if !self.registry.touch(id) {
            debug!(conn_id = %id, "Frame from unregistered connection ignored");
            return;
        }

        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Dropping malformed frame");
                return;
            }
        };

        match message {
            InboundMessage::Authenticate { token } => {
                // Outcome already acknowledged to the client and logged.
                let _ = self
                    .handshake
                    .authenticate_message(id, token.as_deref())
                    .await;
            }
            InboundMessage::Application(message) => self.route(id, message).await,
        }
    }

    async fn route(&self, id: ConnectionId, message: ApplicationMessage) {
        let Some(info) = self.registry.by_connection(id) else {
            return;
        };
        debug!(conn_id = %id, kind = %message.kind, "Application message");

        let ctx = MessageContext {
            connection_id: id,
            subject: info.subject,
            authenticated: info.authenticated,
        };

        let outcome = match &self.handler {
            Some(handler) => handler.handle(&ctx, message.clone()).await,
            None => HandlerOutcome::Unhandled,
        };

        match outcome {
            HandlerOutcome::Reply(event) => {
                self.broadcaster.send(id, event).await;
            }
            HandlerOutcome::Handled => {}
            HandlerOutcome::Unhandled => {
                self.broadcaster
                    .send(id, OutboundEvent::unhandled(message.body))
                    .await;
            }
        }
    }
}
