//! Connection registry.
//!
//! This module provides connection identity tracking including:
//! - Process-unique connection identifiers
//! - Per-connection authentication state
//! - The subject index used for fan-out
//!
//! The registry is the only owner of connection entries. Every other component
//! refers to a connection by its [`ConnectionId`] and gets owned
//! [`ConnectionInfo`] copies back, so a connection closing concurrently can
//! never leave a stale handle behind.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;

use crate::auth::SubjectId;
use crate::error::RegistryError;
use crate::message::{OutboundEvent, Target};

/// Sending half of a connection's outbound queue.
pub type EventSender = mpsc::Sender<Arc<OutboundEvent>>;

/// Receiving half of a connection's outbound queue.
pub type EventReceiver = mpsc::Receiver<Arc<OutboundEvent>>;

/// Unique connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the inner ID value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Point-in-time copy of a connection's state.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Subject bound to the connection, if authenticated
    pub subject: Option<SubjectId>,
    /// Whether the connection has authenticated
    pub authenticated: bool,
    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
    /// Last inbound frame
    pub last_activity: Instant,
}

/// Outcome of a successful [`ConnectionRegistry::authenticate`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTransition {
    /// Subject bound before this call
    pub previous: Option<SubjectId>,
    /// Subject bound now
    pub subject: SubjectId,
}

impl AuthTransition {
    /// Returns true if this call moved the connection out of the unauthenticated state.
    #[must_use]
    pub const fn is_first(&self) -> bool {
        self.previous.is_none()
    }

    /// Returns true if an authenticated connection was re-bound to another subject.
    #[must_use]
    pub fn is_rebind(&self) -> bool {
        self.previous.as_ref().is_some_and(|prev| *prev != self.subject)
    }
}

#[derive(Debug)]
struct Connection {
    subject: Option<SubjectId>,
    authenticated: bool,
    connected_at: DateTime<Utc>,
    last_activity: Instant,
    sender: EventSender,
}

impl Connection {
    fn info(&self, id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            id,
            subject: self.subject.clone(),
            authenticated: self.authenticated,
            connected_at: self.connected_at,
            last_activity: self.last_activity,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryIndex {
    connections: HashMap<ConnectionId, Connection>,
    subjects: HashMap<SubjectId, HashSet<ConnectionId>>,
}

impl RegistryIndex {
    fn detach(&mut self, subject: &SubjectId, id: ConnectionId) {
        if let Some(ids) = self.subjects.get_mut(subject) {
            ids.remove(&id);
            if ids.is_empty() {
                self.subjects.remove(subject);
            }
        }
    }
}

/// Registry of all live connections.
///
/// Both indices live behind one mutex, so `add`, `remove` and `authenticate`
/// are linearizable and no reader ever sees a subject entry pointing at a
/// connection that is missing or unauthenticated.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    index: Mutex<RegistryIndex>,
}

impl ConnectionRegistry {
    /// Creates a new connection registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new unauthenticated connection and returns its ID.
    pub fn add(&self, sender: EventSender) -> ConnectionId {
        let id = ConnectionId::generate();
        let now = Instant::now();
        let connection = Connection {
            subject: None,
            authenticated: false,
            connected_at: Utc::now(),
            last_activity: now,
            sender,
        };
        self.index.lock().connections.insert(id, connection);
        id
    }

    /// Removes a connection from both indices.
    ///
    /// Returns the final state of the connection, or `None` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let mut index = self.index.lock();
        let connection = index.connections.remove(&id)?;
        if let Some(subject) = &connection.subject {
            index.detach(subject, id);
        }
        Some(connection.info(id))
    }

    /// Marks a connection as authenticated as `subject`.
    ///
    /// Re-authenticating an authenticated connection re-binds it; the subject
    /// index is updated in the same critical section.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the connection has been removed.
    pub fn authenticate(
        &self,
        id: ConnectionId,
        subject: SubjectId,
    ) -> Result<AuthTransition, RegistryError> {
        self.authenticate_and_enqueue(id, subject, &[])
    }

    /// Like [`authenticate`](Self::authenticate), but first enqueues `events`
    /// on the connection under the same lock.
    ///
    /// Fan-out only sees the new binding after `events` are queued, so they
    /// reach the client ahead of anything broadcast to the subject. A queue
    /// that cannot take every event gets the connection removed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the connection has been removed,
    /// and [`RegistryError::QueueRejected`] if its queue is full or closed.
    pub fn authenticate_and_enqueue(
        &self,
        id: ConnectionId,
        subject: SubjectId,
        events: &[Arc<OutboundEvent>],
    ) -> Result<AuthTransition, RegistryError> {
        let mut index = self.index.lock();
        let connection = index
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if events
            .iter()
            .any(|event| connection.sender.try_send(event.clone()).is_err())
        {
            let bound = index
                .connections
                .remove(&id)
                .and_then(|connection| connection.subject);
            if let Some(bound) = bound {
                index.detach(&bound, id);
            }
            return Err(RegistryError::QueueRejected(id));
        }

        let previous = connection.subject.replace(subject.clone());
        connection.authenticated = true;

        if let Some(prev) = previous.as_ref().filter(|prev| **prev != subject) {
            index.detach(prev, id);
        }
        index.subjects.entry(subject.clone()).or_default().insert(id);

        Ok(AuthTransition { previous, subject })
    }

    /// Records inbound activity. Returns false if the connection is gone.
    pub fn touch(&self, id: ConnectionId) -> bool {
        match self.index.lock().connections.get_mut(&id) {
            Some(connection) => {
                connection.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Looks up a connection by ID.
    #[must_use]
    pub fn by_connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.index
            .lock()
            .connections
            .get(&id)
            .map(|connection| connection.info(id))
    }

    /// Returns the authenticated connections bound to `subject`.
    #[must_use]
    pub fn by_subject(&self, subject: &SubjectId) -> HashSet<ConnectionId> {
        self.index
            .lock()
            .subjects
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the outbound queues matching `target`.
    ///
    /// The result is a consistent snapshot taken under the registry lock.
    /// `Target::Connection` matches regardless of authentication state; the
    /// other targets only match authenticated connections.
    #[must_use]
    pub fn outbound(&self, target: &Target) -> Vec<(ConnectionId, EventSender)> {
        let index = self.index.lock();
        match target {
            Target::Connection(id) => index
                .connections
                .get(id)
                .map(|connection| vec![(*id, connection.sender.clone())])
                .unwrap_or_default(),
            Target::Subject(subject) => index
                .subjects
                .get(subject)
                .into_iter()
                .flatten()
                .filter_map(|id| {
                    index
                        .connections
                        .get(id)
                        .map(|connection| (*id, connection.sender.clone()))
                })
                .collect(),
            Target::All => index
                .connections
                .iter()
                .filter(|(_, connection)| connection.authenticated)
                .map(|(id, connection)| (*id, connection.sender.clone()))
                .collect(),
        }
    }

    /// Returns a snapshot of every live connection.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.index
            .lock()
            .connections
            .iter()
            .map(|(id, connection)| connection.info(*id))
            .collect()
    }

    /// Returns the number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.index.lock().connections.len()
    }

    /// Returns the number of authenticated connections.
    #[must_use]
    pub fn authenticated_count(&self) -> usize {
        self.index
            .lock()
            .connections
            .values()
            .filter(|connection| connection.authenticated)
            .count()
    }

    /// Returns the number of distinct subjects with at least one connection.
    #[must_use]
    pub fn subject_count(&self) -> usize {
        self.index.lock().subjects.len()
    }

    /// Drops every connection. Their writers close once the queues drain.
    pub fn clear(&self) -> usize {
        let mut index = self.index.lock();
        let count = index.connections.len();
        index.connections.clear();
        index.subjects.clear();
        count
    }
}
