//! # Tradewire Gateway
//!
//! Real-time WebSocket gateway of the trading platform.
//!
//! This crate provides:
//! - A connection registry indexed by connection and by subject
//! - The authentication handshake (query token or in-band message)
//! - Initial state synchronization after authentication
//! - Targeted and fan-out broadcasting with per-connection queues
//!
//! # Architecture
//!
//! Each socket has one reader loop and one writer task. The reader parses
//! frames and hands them to the [`Dispatcher`]; everything destined for the
//! client goes through the [`Broadcaster`] into the connection's bounded
//! queue, which only the writer drains.
//!
//! # Authentication
//!
//! Tokens can be passed via:
//! - Query parameter: `ws://host/ws?token=<jwt>`
//! - Auth message after connection: `{"type":"authenticate","token":"<jwt>"}`
//!
//! Unauthenticated connections stay open and may retry.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod auth;
pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod message;
pub mod routes;
pub mod session;
pub mod state;
pub mod sync;

pub use auth::{CredentialVerifier, JwtManager, SubjectId};
pub use broadcaster::{Broadcaster, DeliveryReport};
pub use config::{GatewayConfig, JwtConfig, WsConfig};
pub use connection::{ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use dispatcher::{ApplicationHandler, Dispatcher, EchoHandler, HandlerOutcome, MessageContext};
pub use error::{GatewayError, SnapshotError, VerificationError};
pub use handshake::{Acknowledgement, Handshake};
pub use message::{ApplicationMessage, InboundMessage, OutboundEvent, Target};
pub use routes::create_router;
pub use state::GatewayState;
pub use sync::{EmptySnapshotProvider, SnapshotProvider, StateSynchronizer};
