use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Errors raised by a replica store provider
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("replica store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid passphrase for user {0}")]
    InvalidPassphrase(String),
    #[error("unknown user {0}")]
    UnknownUser(String),
}

/// The value shape stored at every catalog key
///
/// `data` is hex-encoded AEAD ciphertext for the private partition and
/// plaintext JSON for explicitly published public-partition entries. The
/// replica store never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: String,
}

/// The eventually-consistent replicated key/value+list store the catalog is
/// layered over
///
/// Each user owns an isolated keyspace gated by a passphrase. Point keys hold
/// a single [`Envelope`]; named list collections hold an append-only sequence
/// of envelopes. All operations on a username require a prior successful
/// [`authenticate`](ReplicaStore::authenticate) for that username.
///
/// Conflict resolution between concurrent writers is the provider's own
/// last-write-wins; the catalog does not add coordination on top.
#[async_trait]
pub trait ReplicaStore: Send + Sync + 'static {
    /// Create-if-absent, then log in
    ///
    /// # Errors
    ///
    /// Returns `ReplicaError::InvalidPassphrase` when the user exists under a
    /// different passphrase.
    async fn authenticate(&self, username: &str, passphrase: &str) -> Result<(), ReplicaError>;

    /// Write the envelope at a point key, replacing any previous value
    async fn put(&self, username: &str, key: &str, value: Envelope) -> Result<(), ReplicaError>;

    /// Read the envelope at a point key; absence is not an error
    async fn get(&self, username: &str, key: &str) -> Result<Option<Envelope>, ReplicaError>;

    /// Append an envelope to a named list collection
    async fn append(
        &self,
        username: &str,
        collection: &str,
        value: Envelope,
    ) -> Result<(), ReplicaError>;

    /// Subscribe to a list collection
    ///
    /// The receiver first replays every entry already in the collection, then
    /// streams appends as they land. The subscription ends when the receiver
    /// is dropped.
    async fn subscribe(
        &self,
        username: &str,
        collection: &str,
    ) -> Result<flume::Receiver<Envelope>, ReplicaError>;
}
