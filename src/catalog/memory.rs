use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::replica::{Envelope, ReplicaError, ReplicaStore};

/// In-memory replica store using HashMaps
///
/// One keyspace per authenticated username, live subscribers per collection.
/// Cloning shares the underlying state, so one instance can back several
/// catalog handles in a test.
#[derive(Debug, Clone, Default)]
pub struct MemoryReplicaStore {
    inner: Arc<Mutex<MemoryReplicaStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryReplicaStoreInner {
    users: HashMap<String, UserSpace>,
}

#[derive(Debug, Default)]
struct UserSpace {
    passphrase: String,
    keys: HashMap<String, Envelope>,
    collections: HashMap<String, Vec<Envelope>>,
    subscribers: HashMap<String, Vec<flume::Sender<Envelope>>>,
}

impl MemoryReplicaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_user<T>(
        &self,
        username: &str,
        f: impl FnOnce(&mut UserSpace) -> T,
    ) -> Result<T, ReplicaError> {
        let mut inner = self.inner.lock();
        let user = inner
            .users
            .get_mut(username)
            .ok_or_else(|| ReplicaError::UnknownUser(username.to_string()))?;
        Ok(f(user))
    }
}

#[async_trait]
impl ReplicaStore for MemoryReplicaStore {
    async fn authenticate(&self, username: &str, passphrase: &str) -> Result<(), ReplicaError> {
        let mut inner = self.inner.lock();
        match inner.users.get(username) {
            Some(user) if user.passphrase == passphrase => Ok(()),
            Some(_) => Err(ReplicaError::InvalidPassphrase(username.to_string())),
            None => {
                inner.users.insert(
                    username.to_string(),
                    UserSpace {
                        passphrase: passphrase.to_string(),
                        ..UserSpace::default()
                    },
                );
                Ok(())
            }
        }
    }

    async fn put(&self, username: &str, key: &str, value: Envelope) -> Result<(), ReplicaError> {
        self.with_user(username, |user| {
            user.keys.insert(key.to_string(), value);
        })
    }

    async fn get(&self, username: &str, key: &str) -> Result<Option<Envelope>, ReplicaError> {
        self.with_user(username, |user| user.keys.get(key).cloned())
    }

    async fn append(
        &self,
        username: &str,
        collection: &str,
        value: Envelope,
    ) -> Result<(), ReplicaError> {
        self.with_user(username, |user| {
            user.collections
                .entry(collection.to_string())
                .or_default()
                .push(value.clone());

            // fan out to live subscribers, dropping any that hung up
            if let Some(senders) = user.subscribers.get_mut(collection) {
                senders.retain(|tx| tx.send(value.clone()).is_ok());
            }
        })
    }

    async fn subscribe(
        &self,
        username: &str,
        collection: &str,
    ) -> Result<flume::Receiver<Envelope>, ReplicaError> {
        self.with_user(username, |user| {
            let (tx, rx) = flume::unbounded();
            if let Some(existing) = user.collections.get(collection) {
                for entry in existing {
                    // unbounded: replay cannot block
                    let _ = tx.send(entry.clone());
                }
            }
            user.subscribers
                .entry(collection.to_string())
                .or_default()
                .push(tx);
            rx
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn envelope(data: &str) -> Envelope {
        Envelope {
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn test_authenticate_create_then_login() {
        let store = MemoryReplicaStore::new();
        store.authenticate("alice", "pw").await.unwrap();
        store.authenticate("alice", "pw").await.unwrap();

        let result = store.authenticate("alice", "wrong").await;
        assert!(matches!(result, Err(ReplicaError::InvalidPassphrase(_))));
    }

    #[tokio::test]
    async fn test_operations_require_authentication() {
        let store = MemoryReplicaStore::new();
        let result = store.get("nobody", "some/key").await;
        assert!(matches!(result, Err(ReplicaError::UnknownUser(_))));
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryReplicaStore::new();
        store.authenticate("alice", "pw").await.unwrap();

        assert_eq!(store.get("alice", "k").await.unwrap(), None);
        store.put("alice", "k", envelope("v1")).await.unwrap();
        assert_eq!(store.get("alice", "k").await.unwrap(), Some(envelope("v1")));

        // point writes replace
        store.put("alice", "k", envelope("v2")).await.unwrap();
        assert_eq!(store.get("alice", "k").await.unwrap(), Some(envelope("v2")));
    }

    #[tokio::test]
    async fn test_keyspaces_are_isolated() {
        let store = MemoryReplicaStore::new();
        store.authenticate("alice", "pw").await.unwrap();
        store.authenticate("bob", "pw").await.unwrap();

        store.put("alice", "k", envelope("secret")).await.unwrap();
        assert_eq!(store.get("bob", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_subscribe_replays_then_streams() {
        let store = MemoryReplicaStore::new();
        store.authenticate("alice", "pw").await.unwrap();

        store.append("alice", "list", envelope("a")).await.unwrap();
        store.append("alice", "list", envelope("b")).await.unwrap();

        let rx = store.subscribe("alice", "list").await.unwrap();
        assert_eq!(rx.recv_async().await.unwrap(), envelope("a"));
        assert_eq!(rx.recv_async().await.unwrap(), envelope("b"));

        store.append("alice", "list", envelope("c")).await.unwrap();
        assert_eq!(rx.recv_async().await.unwrap(), envelope("c"));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let store = MemoryReplicaStore::new();
        store.authenticate("alice", "pw").await.unwrap();

        let rx = store.subscribe("alice", "list").await.unwrap();
        drop(rx);

        // append after the receiver hung up must not error
        store.append("alice", "list", envelope("a")).await.unwrap();

        let rx = store.subscribe("alice", "list").await.unwrap();
        assert_eq!(rx.recv_async().await.unwrap(), envelope("a"));
    }
}
