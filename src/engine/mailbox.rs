use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::crypto::{seal, unseal, PublicKey, SealedError};
use crate::identity::{AuthError, AuthContext, Identity};

use super::notifications::{decode_body, Notification, NotificationError};

/// Errors raised by the mailbox layer
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("mailbox error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("sealed message error: {0}")]
    Sealed(#[from] SealedError),
    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),
}

/// A message as the transport carries it: sealed body, opaque to the
/// transport itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: Vec<u8>,
    pub created_at: u64,
}

/// A message after the recipient unsealed its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub id: String,
    pub from: String,
    pub body: Vec<u8>,
    pub created_at: u64,
}

/// The secure-messaging transport, consumed through this narrow interface
///
/// Inboxes are addressed by recipient public key; bodies are already sealed
/// when they reach the transport.
#[async_trait]
pub trait Messaging: Send + Sync + 'static {
    /// Ensure the owner's inbox exists; returns its mailbox id
    async fn setup_mailbox(
        &self,
        auth: &AuthContext,
        owner: &PublicKey,
    ) -> Result<String, MailboxError>;

    async fn list_inbox_messages(
        &self,
        auth: &AuthContext,
        mailbox_id: &str,
    ) -> Result<Vec<SealedMessage>, MailboxError>;

    async fn send_message(
        &self,
        auth: &AuthContext,
        from: &PublicKey,
        to: &PublicKey,
        body: Vec<u8>,
    ) -> Result<SealedMessage, MailboxError>;

    async fn delete_inbox_message(
        &self,
        auth: &AuthContext,
        mailbox_id: &str,
        message_id: &str,
    ) -> Result<(), MailboxError>;

    /// Push subscription for new inbox messages; ends when the receiver is
    /// dropped
    async fn watch_inbox(
        &self,
        auth: &AuthContext,
        mailbox_id: &str,
    ) -> Result<flume::Receiver<SealedMessage>, MailboxError>;
}

/// An identity's mailbox: seals outgoing bodies, unseals incoming ones
///
/// Cheap to clone; clones share the transport handle.
#[derive(Clone)]
pub struct Mailbox {
    identity: Identity,
    messaging: Arc<dyn Messaging>,
    mailbox_id: String,
}

impl Mailbox {
    /// Set up the identity's inbox on the transport
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is unauthenticated or the transport
    /// rejects the setup.
    pub async fn create(
        identity: Identity,
        messaging: Arc<dyn Messaging>,
    ) -> Result<Self, MailboxError> {
        let auth = identity.auth()?.clone();
        let mailbox_id = messaging.setup_mailbox(&auth, &identity.public()).await?;
        Ok(Self {
            identity,
            messaging,
            mailbox_id,
        })
    }

    pub fn owner(&self) -> PublicKey {
        self.identity.public()
    }

    /// Fetch and unseal every queued inbox message
    pub async fn list_inbox_messages(&self) -> Result<Vec<DecryptedMessage>, MailboxError> {
        let auth = self.identity.auth()?.clone();
        let sealed = self
            .messaging
            .list_inbox_messages(&auth, &self.mailbox_id)
            .await?;

        let mut inbox = Vec::with_capacity(sealed.len());
        for message in sealed {
            let body = unseal(&message.body, self.identity.secret())?;
            inbox.push(DecryptedMessage {
                id: message.id,
                from: message.from,
                body,
                created_at: message.created_at,
            });
        }
        Ok(inbox)
    }

    /// Seal a body for the recipient and hand it to the transport
    pub async fn send_message(
        &self,
        to: &PublicKey,
        body: &[u8],
    ) -> Result<SealedMessage, MailboxError> {
        let auth = self.identity.auth()?.clone();
        let sealed = seal(body, to)?;
        self.messaging
            .send_message(&auth, &self.identity.public(), to, sealed)
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<(), MailboxError> {
        let auth = self.identity.auth()?.clone();
        self.messaging
            .delete_inbox_message(&auth, &self.mailbox_id, message_id)
            .await
    }

    /// Subscribe to incoming messages as parsed notifications
    ///
    /// Messages that fail to unseal or classify are logged and skipped.
    pub async fn watch(&self) -> Result<flume::Receiver<Notification>, MailboxError> {
        let auth = self.identity.auth()?.clone();
        let sealed_rx = self
            .messaging
            .watch_inbox(&auth, &self.mailbox_id)
            .await?;
        let (tx, rx) = flume::unbounded();
        let secret = self.identity.secret().clone();

        tokio::spawn(async move {
            while let Ok(message) = sealed_rx.recv_async().await {
                let parsed = unseal(&message.body, &secret)
                    .map_err(MailboxError::from)
                    .and_then(|body| Ok(decode_body(&body)?));
                match parsed {
                    Ok((notification_type, invitation)) => {
                        let notification = Notification {
                            id: message.id,
                            from: message.from,
                            created_at: message.created_at,
                            notification_type,
                            invitation,
                        };
                        if tx.send(notification).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(message_id = %message.id, error = %e, "skipping unreadable inbox message"),
                }
            }
        });
        Ok(rx)
    }
}

/// In-memory messaging transport, inboxes keyed by recipient public key
#[derive(Debug, Clone, Default)]
pub struct MemoryMessaging {
    inner: Arc<Mutex<MemoryMessagingInner>>,
}

#[derive(Debug, Default)]
struct MemoryMessagingInner {
    inboxes: std::collections::HashMap<String, Inbox>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Inbox {
    messages: Vec<SealedMessage>,
    watchers: Vec<flume::Sender<SealedMessage>>,
}

impl MemoryMessaging {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl Messaging for MemoryMessaging {
    async fn setup_mailbox(
        &self,
        _auth: &AuthContext,
        owner: &PublicKey,
    ) -> Result<String, MailboxError> {
        let mailbox_id = owner.to_hex();
        self.inner.lock().inboxes.entry(mailbox_id.clone()).or_default();
        Ok(mailbox_id)
    }

    async fn list_inbox_messages(
        &self,
        _auth: &AuthContext,
        mailbox_id: &str,
    ) -> Result<Vec<SealedMessage>, MailboxError> {
        let inner = self.inner.lock();
        let inbox = inner
            .inboxes
            .get(mailbox_id)
            .ok_or_else(|| anyhow::anyhow!("unknown mailbox: {}", mailbox_id))?;
        Ok(inbox.messages.clone())
    }

    async fn send_message(
        &self,
        _auth: &AuthContext,
        from: &PublicKey,
        to: &PublicKey,
        body: Vec<u8>,
    ) -> Result<SealedMessage, MailboxError> {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let message = SealedMessage {
            id: format!("msg-{}", inner.next_id),
            from: from.to_hex(),
            to: to.to_hex(),
            body,
            created_at: now_ms(),
        };

        // delivery creates the inbox if the recipient never set one up
        let inbox = inner.inboxes.entry(to.to_hex()).or_default();
        inbox.messages.push(message.clone());
        inbox
            .watchers
            .retain(|tx| tx.send(message.clone()).is_ok());
        Ok(message)
    }

    async fn delete_inbox_message(
        &self,
        _auth: &AuthContext,
        mailbox_id: &str,
        message_id: &str,
    ) -> Result<(), MailboxError> {
        let mut inner = self.inner.lock();
        let inbox = inner
            .inboxes
            .get_mut(mailbox_id)
            .ok_or_else(|| anyhow::anyhow!("unknown mailbox: {}", mailbox_id))?;
        inbox.messages.retain(|m| m.id != message_id);
        Ok(())
    }

    async fn watch_inbox(
        &self,
        _auth: &AuthContext,
        mailbox_id: &str,
    ) -> Result<flume::Receiver<SealedMessage>, MailboxError> {
        let mut inner = self.inner.lock();
        let inbox = inner
            .inboxes
            .get_mut(mailbox_id)
            .ok_or_else(|| anyhow::anyhow!("unknown mailbox: {}", mailbox_id))?;
        let (tx, rx) = flume::unbounded();
        inbox.watchers.push(tx);
        Ok(rx)
    }
}
