//! Credential verification.
//!
//! The gateway only needs one capability from the authentication system:
//! turn a credential string into a [`SubjectId`] or reject it. That capability
//! is the [`CredentialVerifier`] trait. [`JwtManager`] is the default
//! implementation, verifying HS256 tokens of the shape the platform login
//! issues (`{ id, username, exp }`) as well as standard `sub` tokens.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode,
    errors::ErrorKind,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::config::JwtConfig;
use crate::error::{GatewayError, VerificationError};

/// Identifier of an authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    /// Creates a subject identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// Login tokens carry numeric user ids; everything else uses strings.
impl<'de> Deserialize<'de> for SubjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawSubject {
            Text(String),
            Unsigned(u64),
            Signed(i64),
        }

        Ok(match RawSubject::deserialize(deserializer)? {
            RawSubject::Text(s) => Self(s),
            RawSubject::Unsigned(n) => Self(n.to_string()),
            RawSubject::Signed(n) => Self(n.to_string()),
        })
    }
}

/// Verifies a credential and returns the subject it asserts.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Verifies `token`.
    ///
    /// # Errors
    ///
    /// Returns a [`VerificationError`] if the credential is not acceptable.
    async fn verify(&self, token: &str) -> Result<SubjectId, VerificationError>;
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID); the login endpoint calls it `id`
    #[serde(alias = "id")]
    pub sub: SubjectId,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// JWT ID (unique identifier)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// JWT token manager.
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: Option<String>,
    audience: Option<String>,
    expiration_secs: i64,
}

impl fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtManager")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expiration_secs", &self.expiration_secs)
            .finish_non_exhaustive()
    }
}

impl JwtManager {
    /// Creates a new JWT manager from configuration.
    #[must_use]
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            expiration_secs: i64::try_from(config.expiration_secs).unwrap_or(i64::MAX),
        }
    }

    /// Generates a signed token for a subject.
    ///
    /// # Errors
    ///
    /// Returns an error if token encoding fails.
    pub fn generate_token(
        &self,
        subject: &SubjectId,
        username: Option<String>,
    ) -> Result<String, GatewayError> {
        let now = Utc::now();
        let exp = now
            .checked_add_signed(Duration::seconds(self.expiration_secs))
            .unwrap_or(now);

        let claims = Claims {
            sub: subject.clone(),
            username,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Some(uuid::Uuid::new_v4().to_string()),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| GatewayError::Internal(format!("Failed to generate token: {e}")))
    }

    /// Validates a JWT token and returns the claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is invalid or expired.
    pub fn validate_token(&self, token: &str) -> Result<Claims, VerificationError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // A configured issuer or audience must be present, not just match when present.
        let mut required = vec!["exp"];
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
            required.push("iss");
        }
        match &self.audience {
            Some(audience) => {
                validation.set_audience(&[audience]);
                required.push("aud");
            }
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&required);

        let token_data: TokenData<Claims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => VerificationError::Expired,
                _ => VerificationError::Invalid(e.to_string()),
            })?;

        Ok(token_data.claims)
    }
}

#[async_trait]
impl CredentialVerifier for JwtManager {
    async fn verify(&self, token: &str) -> Result<SubjectId, VerificationError> {
        let claims = self.validate_token(token)?;
        if claims.sub.as_str().is_empty() {
            return Err(VerificationError::MissingSubject);
        }
        Ok(claims.sub)
    }
}

/// Extracts the bearer token from an Authorization-style value.
#[must_use]
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
}
