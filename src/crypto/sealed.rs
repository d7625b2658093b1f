//! Sealed messages using ECDH + ChaCha20-Poly1305
//!
//! Mailbox bodies are encrypted to the recipient's identity key so that only
//! the holder of the matching secret key can read them:
//! 1. **Generate ephemeral keypair**: a temporary Ed25519 keypair per message
//! 2. **Perform ECDH**: convert both keys to X25519 and compute a shared secret
//! 3. **Encrypt**: use the shared secret as an AEAD key over the body
//! 4. **Package**: `[ ephemeral_pubkey: 32 bytes ][ aead ciphertext ]`
//!
//! The ephemeral key is discarded after sealing, so past messages cannot be
//! re-encrypted to another party even by the sender.

use super::keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
use super::secret::{Secret, SecretError};

/// Errors that can occur while sealing or unsealing a message
#[derive(Debug, thiserror::Error)]
pub enum SealedError {
    #[error("sealed message error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// Seal a message body for a specific recipient
///
/// # Errors
///
/// Returns an error if the recipient key cannot be converted for ECDH or
/// encryption fails.
pub fn seal(plaintext: &[u8], recipient: &PublicKey) -> Result<Vec<u8>, SealedError> {
    let ephemeral_private = SecretKey::generate();
    let ephemeral_public = ephemeral_private.public();

    let shared_secret = ephemeral_private
        .to_x25519()
        .diffie_hellman(&recipient.to_x25519()?);
    let secret = Secret::from(*shared_secret.as_bytes());

    let ciphertext = secret.encrypt(plaintext)?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + ciphertext.len());
    out.extend_from_slice(&ephemeral_public.to_bytes());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unseal a message body with the recipient's secret key
///
/// # Errors
///
/// Returns an error if the message is truncated, was sealed for a different
/// recipient, or was tampered with.
pub fn unseal(data: &[u8], recipient_secret: &SecretKey) -> Result<Vec<u8>, SealedError> {
    if data.len() < PUBLIC_KEY_SIZE {
        return Err(anyhow::anyhow!("sealed message too short for ephemeral key").into());
    }

    let ephemeral_public = PublicKey::try_from(&data[..PUBLIC_KEY_SIZE])?;

    let shared_secret = recipient_secret
        .to_x25519()
        .diffie_hellman(&ephemeral_public.to_x25519()?);
    let secret = Secret::from(*shared_secret.as_bytes());

    Ok(secret.decrypt(&data[PUBLIC_KEY_SIZE..])?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let recipient = SecretKey::generate();
        let body = b"{\"type\":\"invitation\"}";

        let sealed = seal(body, &recipient.public()).unwrap();
        let opened = unseal(&sealed, &recipient).unwrap();

        assert_eq!(body.as_slice(), opened.as_slice());
    }

    #[test]
    fn test_wrong_recipient_rejected() {
        let recipient = SecretKey::generate();
        let eavesdropper = SecretKey::generate();

        let sealed = seal(b"secret", &recipient.public()).unwrap();
        assert!(unseal(&sealed, &eavesdropper).is_err());
    }

    #[test]
    fn test_each_seal_is_unique() {
        let recipient = SecretKey::generate();
        let a = seal(b"body", &recipient.public()).unwrap();
        let b = seal(b"body", &recipient.public()).unwrap();
        // fresh ephemeral key and nonce per message
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncated_message_rejected() {
        let recipient = SecretKey::generate();
        assert!(unseal(&[0u8; 8], &recipient).is_err());
    }
}
