/**
 * Encrypted metadata catalog and storage-synchronization
 *  engine for per-identity, path-addressed buckets.
 */
pub mod catalog;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Symmetric content encryption
 *  - Sealed message bodies for the mailbox
 */
pub mod crypto;
/**
 * Storage engine: bucket lifecycle, directory listing,
 *  uploads, and temp-identity access migration over the
 *  content backend and messaging collaborators.
 */
pub mod engine;
/**
 * User identity, bearer credentials, and the
 *  deterministic derivations the catalog builds on.
 */
pub mod identity;
/**
 * Pure path helpers: canonical form, depth derivation,
 *  parent-before-child upload ordering.
 */
pub mod paths;

pub mod prelude {
    pub use crate::catalog::{MetadataStore, PublicStoreCredentials, StoreConfig, StoreError};
    pub use crate::crypto::{PublicKey, Secret, SecretKey};
    pub use crate::engine::{EngineError, StorageEngine, UploadEvent};
    pub use crate::identity::{AuthContext, Identity};
}
