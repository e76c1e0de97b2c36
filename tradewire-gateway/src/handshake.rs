//! Authentication handshake.
//!
//! A connection starts unauthenticated and becomes authenticated through one
//! of two triggers: a `token` query parameter at accept time, or an
//! `authenticate` message later on. Both go through
//! [`Handshake::attempt_authenticate`], so validation and the registry
//! transition are identical regardless of trigger. The transition never runs
//! backwards; a second successful attempt only re-binds the subject.
//!
//! When the client is told about the transition, `auth_success` and
//! `initial_state` are queued in the same registry critical section that
//! publishes the subject binding. Subject broadcasts therefore either miss
//! the connection or land after both events.
//!
//! Failures never close the connection. The client may retry.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::{CredentialVerifier, SubjectId, extract_bearer_token};
use crate::broadcaster::Broadcaster;
use crate::connection::{AuthTransition, ConnectionId, ConnectionRegistry};
use crate::error::{GatewayError, VerificationError};
use crate::message::OutboundEvent;
use crate::sync::StateSynchronizer;

/// What the client hears about a successful authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Bind the subject without sending anything
    Silent,
    /// Queue `auth_success` and `initial_state` together with the binding
    Announce,
}

/// Drives the unauthenticated to authenticated transition.
#[derive(Clone)]
pub struct Handshake {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn CredentialVerifier>,
    broadcaster: Broadcaster,
    synchronizer: StateSynchronizer,
    verify_timeout: Duration,
    sync_on_query_auth: bool,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("verify_timeout", &self.verify_timeout)
            .field("sync_on_query_auth", &self.sync_on_query_auth)
            .finish_non_exhaustive()
    }
}

impl Handshake {
    /// Creates a new handshake.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<dyn CredentialVerifier>,
        broadcaster: Broadcaster,
        synchronizer: StateSynchronizer,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            verifier,
            broadcaster,
            synchronizer,
            verify_timeout,
            sync_on_query_auth: false,
        }
    }

    /// Also send `auth_success` and `initial_state` after query-parameter authentication.
    #[must_use]
    pub fn with_sync_on_query_auth(mut self, enabled: bool) -> Self {
        self.sync_on_query_auth = enabled;
        self
    }

    /// Verifies `credential` and binds the connection to its subject.
    ///
    /// With [`Acknowledgement::Announce`] the snapshot is fetched before the
    /// binding becomes visible, then queued with `auth_success` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Verification`] if the credential is rejected or
    /// the verifier times out, and [`GatewayError::ConnectionGone`] if the
    /// connection closed while verification was in flight.
    pub async fn attempt_authenticate(
        &self,
        id: ConnectionId,
        credential: &str,
        ack: Acknowledgement,
    ) -> Result<AuthTransition, GatewayError> {
        let token = extract_bearer_token(credential).unwrap_or(credential).trim();
        if token.is_empty() {
            return Err(VerificationError::MissingToken.into());
        }

        let subject = match tokio::time::timeout(self.verify_timeout, self.verifier.verify(token))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(VerificationError::Timeout {
                    timeout_ms: u64::try_from(self.verify_timeout.as_millis()).unwrap_or(u64::MAX),
                }
                .into());
            }
        };

        let events = match ack {
            Acknowledgement::Silent => Vec::new(),
            Acknowledgement::Announce => {
                let mut events = vec![Arc::new(OutboundEvent::auth_success(&subject))];
                if let Some(state) = self.synchronizer.prepare(id, &subject).await {
                    events.push(Arc::new(state));
                }
                events
            }
        };

        Ok(self.registry.authenticate_and_enqueue(id, subject, &events)?)
    }

    /// Handles the `token` query parameter supplied at accept time.
    ///
    /// Returns the bound subject on success. A rejected token leaves the
    /// connection open and unauthenticated.
    pub async fn authenticate_on_accept(&self, id: ConnectionId, token: &str) -> Option<SubjectId> {
        let ack = if self.sync_on_query_auth {
            Acknowledgement::Announce
        } else {
            Acknowledgement::Silent
        };
        match self.attempt_authenticate(id, token, ack).await {
            Ok(transition) => {
                info!(conn_id = %id, user_id = %transition.subject, "Authenticated via query token");
                Some(transition.subject)
            }
            Err(e) if e.is_connection_gone() => {
                debug!(conn_id = %id, "Connection closed during query token verification");
                None
            }
            Err(e) => {
                warn!(conn_id = %id, error = %e, "Invalid token in WebSocket query");
                None
            }
        }
    }

    /// Handles an in-band `authenticate` message.
    ///
    /// On success the connection gets `auth_success` followed by
    /// `initial_state`; on failure it gets `auth_error`. Nothing is sent to
    /// any other connection.
    ///
    /// # Errors
    ///
    /// Returns the failure after it has been acknowledged to the client.
    pub async fn authenticate_message(
        &self,
        id: ConnectionId,
        token: Option<&str>,
    ) -> Result<AuthTransition, GatewayError> {
        let result = match token {
            Some(token) => {
                self.attempt_authenticate(id, token, Acknowledgement::Announce)
                    .await
            }
            None => Err(VerificationError::MissingToken.into()),
        };

        match &result {
            Ok(transition) => {
                if transition.is_rebind() {
                    info!(
                        conn_id = %id,
                        user_id = %transition.subject,
                        previous_user_id = ?transition.previous,
                        "WebSocket re-bound to new subject"
                    );
                } else {
                    info!(conn_id = %id, user_id = %transition.subject, "WebSocket authenticated via message");
                }
            }
            Err(e) if e.is_connection_gone() => {
                debug!(conn_id = %id, "Connection closed during authentication");
            }
            Err(e) => {
                warn!(conn_id = %id, error = %e, code = e.error_code(), "WebSocket authentication failed");
                let message = match e {
                    GatewayError::Verification(err) => err.client_message(),
                    _ => "Authentication failed",
                };
                self.broadcaster
                    .send(id, OutboundEvent::auth_error(message))
                    .await;
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    use crate::connection::EventReceiver;
    use crate::error::SnapshotError;
    use crate::sync::{EmptySnapshotProvider, SnapshotProvider};

    struct StaticVerifier {
        tokens: HashMap<&'static str, &'static str>,
        delay: Duration,
    }

    impl StaticVerifier {
        fn new() -> Self {
            Self {
                tokens: HashMap::from([("good-u1", "u1"), ("good-u2", "u2")]),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl CredentialVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<SubjectId, VerificationError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.tokens
                .get(token)
                .map(|subject| SubjectId::from(*subject))
                .ok_or_else(|| VerificationError::Invalid("unknown token".to_string()))
        }
    }

    struct SlowSnapshot(Duration);

    #[async_trait]
    impl SnapshotProvider for SlowSnapshot {
        async fn snapshot(&self, subject: &SubjectId) -> Result<Value, SnapshotError> {
            tokio::time::sleep(self.0).await;
            Ok(json!({ "subject": subject }))
        }
    }

    fn handshake_with(verifier: StaticVerifier) -> (Arc<ConnectionRegistry>, Handshake) {
        handshake_with_provider(verifier, Arc::new(EmptySnapshotProvider))
    }

    fn handshake_with_provider(
        verifier: StaticVerifier,
        provider: Arc<dyn SnapshotProvider>,
    ) -> (Arc<ConnectionRegistry>, Handshake) {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone(), Duration::from_millis(50));
        let synchronizer = StateSynchronizer::new(
            registry.clone(),
            broadcaster.clone(),
            provider,
            Duration::from_millis(200),
        );
        let handshake = Handshake::new(
            registry.clone(),
            Arc::new(verifier),
            broadcaster,
            synchronizer,
            Duration::from_millis(50),
        );
        (registry, handshake)
    }

    fn connect(registry: &ConnectionRegistry) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::channel(16);
        (registry.add(tx), rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type().to_string());
        }
        types
    }

    #[tokio::test]
    async fn test_valid_message_sends_success_then_initial_state() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);
        let (_other, mut other_rx) = connect(&registry);

        let transition = handshake.authenticate_message(id, Some("good-u1")).await.unwrap();

        assert!(transition.is_first());
        assert_eq!(drain(&mut rx), vec!["auth_success", "initial_state"]);
        assert!(drain(&mut other_rx).is_empty());
        let info = registry.by_connection(id).unwrap();
        assert!(info.authenticated);
        assert_eq!(info.subject, Some(SubjectId::from("u1")));
    }

    #[tokio::test]
    async fn test_subject_broadcast_during_snapshot_fetch_stays_behind_initial_state() {
        let (registry, handshake) = handshake_with_provider(
            StaticVerifier::new(),
            Arc::new(SlowSnapshot(Duration::from_millis(60))),
        );
        let broadcaster = Broadcaster::new(registry.clone(), Duration::from_millis(50));
        let (id, mut rx) = connect(&registry);
        let u1 = SubjectId::from("u1");

        let publisher = {
            let broadcaster = broadcaster.clone();
            let u1 = u1.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                broadcaster
                    .to_subject(&u1, OutboundEvent::new("trade", json!({ "seq": 1 })))
                    .await
            })
        };

        handshake.authenticate_message(id, Some("good-u1")).await.unwrap();
        let early = publisher.await.unwrap();
        assert_eq!(early.delivered, 0);

        broadcaster
            .to_subject(&u1, OutboundEvent::new("trade", json!({ "seq": 2 })))
            .await;

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let types: Vec<&str> = events.iter().map(|event| event.event_type()).collect();
        assert_eq!(types, vec!["auth_success", "initial_state", "trade"]);
        assert_eq!(events[1].payload()["subject"], "u1");
        assert_eq!(events[2].payload()["seq"], 2);
    }

    #[tokio::test]
    async fn test_auth_success_payload_carries_user_id() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);

        handshake.authenticate_message(id, Some("good-u1")).await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload()["userId"], "u1");
    }

    #[tokio::test]
    async fn test_invalid_then_valid_attempt() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);

        let err = handshake.authenticate_message(id, Some("forged")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Verification(VerificationError::Invalid(_))));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), OutboundEvent::AUTH_ERROR);
        assert_eq!(event.payload()["message"], "Invalid authentication token");
        assert!(!registry.by_connection(id).unwrap().authenticated);

        handshake.authenticate_message(id, Some("good-u1")).await.unwrap();
        assert_eq!(drain(&mut rx), vec!["auth_success", "initial_state"]);
        assert!(registry.by_connection(id).unwrap().authenticated);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);

        let err = handshake.authenticate_message(id, None).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Verification(VerificationError::MissingToken)
        ));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload()["message"], "Missing authentication token");
    }

    #[tokio::test]
    async fn test_bearer_prefix_is_stripped() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, _rx) = connect(&registry);

        let transition = handshake
            .attempt_authenticate(id, "Bearer good-u2", Acknowledgement::Silent)
            .await
            .unwrap();
        assert_eq!(transition.subject, SubjectId::from("u2"));
    }

    #[tokio::test]
    async fn test_verifier_timeout_is_a_verification_failure() {
        let verifier = StaticVerifier {
            delay: Duration::from_secs(5),
            ..StaticVerifier::new()
        };
        let (registry, handshake) = handshake_with(verifier);
        let (id, mut rx) = connect(&registry);

        let err = handshake.authenticate_message(id, Some("good-u1")).await.unwrap_err();
        assert_eq!(err.error_code(), "COLLABORATOR_TIMEOUT");
        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload()["message"], "Authentication service unavailable");
        assert!(!registry.by_connection(id).unwrap().authenticated);
    }

    #[tokio::test]
    async fn test_reauthentication_rebinds_subject() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);

        handshake.authenticate_message(id, Some("good-u1")).await.unwrap();
        let transition = handshake.authenticate_message(id, Some("good-u2")).await.unwrap();

        assert!(transition.is_rebind());
        assert!(registry.by_subject(&SubjectId::from("u1")).is_empty());
        assert!(registry.by_subject(&SubjectId::from("u2")).contains(&id));
        assert_eq!(
            drain(&mut rx),
            vec!["auth_success", "initial_state", "auth_success", "initial_state"]
        );
    }

    #[tokio::test]
    async fn test_failed_reauthentication_keeps_existing_binding() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, _rx) = connect(&registry);

        handshake.authenticate_message(id, Some("good-u1")).await.unwrap();
        let _ = handshake.authenticate_message(id, Some("forged")).await;

        let info = registry.by_connection(id).unwrap();
        assert!(info.authenticated);
        assert_eq!(info.subject, Some(SubjectId::from("u1")));
    }

    #[tokio::test]
    async fn test_query_token_authenticates_silently_by_default() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);

        let subject = handshake.authenticate_on_accept(id, "good-u1").await;

        assert_eq!(subject, Some(SubjectId::from("u1")));
        assert!(registry.by_subject(&SubjectId::from("u1")).contains(&id));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_query_token_with_sync_enabled() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let handshake = handshake.with_sync_on_query_auth(true);
        let (id, mut rx) = connect(&registry);

        handshake.authenticate_on_accept(id, "good-u1").await;

        assert_eq!(drain(&mut rx), vec!["auth_success", "initial_state"]);
    }

    #[tokio::test]
    async fn test_invalid_query_token_leaves_connection_open() {
        let (registry, handshake) = handshake_with(StaticVerifier::new());
        let (id, mut rx) = connect(&registry);

        assert!(handshake.authenticate_on_accept(id, "forged").await.is_none());

        let info = registry.by_connection(id).unwrap();
        assert!(!info.authenticated);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_connection_closed_during_verification() {
        let verifier = StaticVerifier {
            delay: Duration::from_millis(20),
            ..StaticVerifier::new()
        };
        let (registry, handshake) = handshake_with(verifier);
        let (id, rx) = connect(&registry);

        let task = {
            let handshake = handshake.clone();
            tokio::spawn(async move { handshake.authenticate_message(id, Some("good-u1")).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.remove(id);
        drop(rx);

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_connection_gone());
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.by_subject(&SubjectId::from("u1")).is_empty());
    }
}
