//! User identity and credential derivation
//!
//! An [`Identity`] bundles the Ed25519 keypair a user controls with the
//! bearer credentials the content backend and messaging transport require.
//! Everything else the system needs from a user is derived here:
//! - the deterministic thread id backing the identity's own catalog replica
//! - the username/passphrase pair the metadata store authenticates with

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey};

const CATALOG_THREAD_CONTEXT: &str = "cask/thread-id/metastore/v1";

/// Errors raised while authenticating an identity against the collaborators
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("identity is not authenticated")]
    Unauthenticated,
}

/// Bearer credential bundle required by the content backend and messaging
/// transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub token: String,
}

/// Username/passphrase pair the metadata store authenticates with
///
/// Both values are deterministic functions of the identity keypair, so the
/// same user always lands on the same catalog replica account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub username: String,
    pub passphrase: String,
}

/// A user identity: keypair plus optional backend credentials
#[derive(Debug, Clone)]
pub struct Identity {
    secret: SecretKey,
    auth: Option<AuthContext>,
}

impl Identity {
    /// Create an identity that has not yet authenticated against the backend
    pub fn new(secret: SecretKey) -> Self {
        Self { secret, auth: None }
    }

    /// Create an identity carrying backend credentials
    pub fn with_auth(secret: SecretKey, auth: AuthContext) -> Self {
        Self {
            secret,
            auth: Some(auth),
        }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public(&self) -> PublicKey {
        self.secret.public()
    }

    /// The stable string form used in access-role maps and share registries
    pub fn public_key_hex(&self) -> String {
        self.public().to_hex()
    }

    /// Sign a message with the identity keypair
    pub fn sign(&self, msg: &[u8]) -> ed25519_dalek::Signature {
        self.secret.sign(msg)
    }

    /// The bearer credentials, or `AuthError::Unauthenticated` if the
    /// identity never authenticated. Checked before any network call.
    pub fn auth(&self) -> Result<&AuthContext, AuthError> {
        self.auth.as_ref().ok_or(AuthError::Unauthenticated)
    }

    /// Deterministic replica-group id for this identity's own catalog
    ///
    /// Content buckets get random thread ids; the catalog thread is derived
    /// from the raw private key so it is rediscoverable from the keypair
    /// alone.
    pub fn catalog_thread_id(&self) -> String {
        hex::encode(blake3::derive_key(
            CATALOG_THREAD_CONTEXT,
            &self.secret.to_bytes(),
        ))
    }

    /// Credentials for the metadata store's private partition
    pub fn store_credentials(&self) -> StoreCredentials {
        StoreCredentials {
            username: self.public_key_hex(),
            passphrase: self.catalog_thread_id(),
        }
    }
}

/// Mints bearer credentials for an arbitrary keypair
///
/// The challenge-response auth service is out of scope; this is the narrow
/// interface the engine consumes from it. `sync_from_temp_key` uses it to
/// authenticate the ephemeral identity encoded in a temp key string.
#[async_trait]
pub trait CredentialIssuer: Send + Sync + 'static {
    async fn issue(&self, secret: &SecretKey) -> Result<AuthContext, AuthError>;
}

/// Issuer that mints unchecked local tokens, for tests and local providers
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialIssuer;

#[async_trait]
impl CredentialIssuer for MemoryCredentialIssuer {
    async fn issue(&self, secret: &SecretKey) -> Result<AuthContext, AuthError> {
        Ok(AuthContext {
            token: format!("local:{}", secret.public().to_hex()),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_catalog_thread_id_is_deterministic() {
        let secret = SecretKey::generate();
        let a = Identity::new(secret.clone());
        let b = Identity::new(secret);
        assert_eq!(a.catalog_thread_id(), b.catalog_thread_id());

        let other = Identity::new(SecretKey::generate());
        assert_ne!(a.catalog_thread_id(), other.catalog_thread_id());
    }

    #[test]
    fn test_store_credentials_shape() {
        let identity = Identity::new(SecretKey::generate());
        let creds = identity.store_credentials();
        assert_eq!(creds.username, identity.public_key_hex());
        assert_eq!(creds.passphrase, identity.catalog_thread_id());
    }

    #[test]
    fn test_auth_gate() {
        let secret = SecretKey::generate();
        let unauthenticated = Identity::new(secret.clone());
        assert!(matches!(
            unauthenticated.auth(),
            Err(AuthError::Unauthenticated)
        ));

        let authed = Identity::with_auth(
            secret,
            AuthContext {
                token: "t".to_string(),
            },
        );
        assert!(authed.auth().is_ok());
    }

    #[tokio::test]
    async fn test_memory_issuer() {
        let issuer = MemoryCredentialIssuer;
        let secret = SecretKey::generate();
        let auth = issuer.issue(&secret).await.unwrap();
        assert!(auth.token.contains(&secret.public().to_hex()));
    }
}
