/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Symmetric content/catalog encryption
 *  - Key-to-key sealed messages
 */
mod keys;
mod sealed;
mod secret;

pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
pub use sealed::{seal, unseal, SealedError};
pub use secret::{Secret, SecretError, NONCE_SIZE, SECRET_SIZE};
