//! Encrypted metadata catalog
//!
//! A per-identity catalog of buckets, files, shares, and notification state,
//! layered over an eventually-consistent replicated key/value+list store:
//!
//! - **[`MetadataStore`]**: the authenticated catalog surface. Every value is
//!   JSON-encoded, sealed under the owner's passphrase-derived key, and stored
//!   as a `{ "data": <hex ciphertext> }` envelope
//! - **[`ReplicaStore`]**: the narrow interface the catalog consumes from the
//!   replicated backend (authenticate, point reads/writes, list appends,
//!   replaying subscriptions)
//! - **[`MemoryReplicaStore`]**: in-process provider for tests and local use
//!
//! List collections (buckets, shares) hydrate in-memory caches through
//! background subscription tasks; [`MetadataStore::open`] blocks for a
//! configurable window before returning, and callers must tolerate a cache
//! that is still filling in afterward.

mod memory;
mod replica;
mod store;
mod types;

pub use memory::MemoryReplicaStore;
pub use replica::{Envelope, ReplicaError, ReplicaStore};
pub use store::{MetadataStore, PublicStoreCredentials, StoreConfig, StoreError};
pub use types::{BucketMetadata, FileMetadata, SharedFileMetadata, ShareUserMetadata};
