use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::crypto::{Secret, SecretError};
use crate::identity::StoreCredentials;

use super::replica::{Envelope, ReplicaError, ReplicaStore};
use super::types::{BucketMetadata, FileMetadata, SharedFileMetadata, ShareUserMetadata};

const CATALOG_KEY_CONTEXT: &str = "cask/catalog-key/v1";

const COLLECTION_BUCKETS: &str = "buckets";
const COLLECTION_SHARED_WITH_ME: &str = "sharedWithMe";
const COLLECTION_SHARED_BY_ME: &str = "sharedByMe";
const COLLECTION_RECENTLY_SHARED_WITH: &str = "recentlySharedWith";

const NOTIFICATIONS_LAST_SEEN_KEY: &str = "notifications/lastSeenAt";

/// Errors raised by the metadata catalog
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("metadata store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("bucket already exists: {0}")]
    AlreadyExists(String),
    #[error("file metadata has no uuid")]
    MissingUuid,
    #[error("replica store error: {0}")]
    Replica(#[from] ReplicaError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Credentials for the shared write-public partition
///
/// A well-known account used only to publish explicitly public entries.
/// Always injected by the caller, never baked into the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicStoreCredentials {
    pub username: String,
    pub passphrase: String,
}

/// Construction-time configuration for [`MetadataStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub public_credentials: PublicStoreCredentials,
    /// How long [`MetadataStore::open`] blocks while the list caches hydrate.
    /// Hydration continues in the background afterward.
    pub hydration_window: Duration,
}

impl StoreConfig {
    pub fn new(public_credentials: PublicStoreCredentials) -> Self {
        Self {
            public_credentials,
            hydration_window: Duration::from_secs(3),
        }
    }

    pub fn with_hydration_window(mut self, window: Duration) -> Self {
        self.hydration_window = window;
        self
    }
}

#[derive(Default)]
struct Caches {
    buckets: Mutex<Vec<BucketMetadata>>,
    shared_with_me: Mutex<Vec<SharedFileMetadata>>,
    shared_by_me: Mutex<Vec<SharedFileMetadata>>,
    recently_shared_with: Mutex<Vec<ShareUserMetadata>>,
}

/// Per-identity encrypted catalog over a [`ReplicaStore`]
///
/// Cheap to clone; all clones share the hydrated caches.
#[derive(Clone)]
pub struct MetadataStore {
    replica: Arc<dyn ReplicaStore>,
    username: String,
    public_username: String,
    key: Secret,
    caches: Arc<Caches>,
}

impl MetadataStore {
    /// Authenticate both partitions, start cache hydration, and wait out the
    /// hydration window
    ///
    /// The private partition is created on first use; the catalog key is
    /// derived from the identity passphrase. The returned store's list caches
    /// may still be incomplete, and keep filling in as replicated entries
    /// arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if either partition rejects its credentials or a
    /// collection subscription cannot be established.
    pub async fn open(
        credentials: StoreCredentials,
        config: StoreConfig,
        replica: Arc<dyn ReplicaStore>,
    ) -> Result<Self, StoreError> {
        replica
            .authenticate(&credentials.username, &credentials.passphrase)
            .await?;
        replica
            .authenticate(
                &config.public_credentials.username,
                &config.public_credentials.passphrase,
            )
            .await?;

        let store = Self {
            replica,
            username: credentials.username,
            public_username: config.public_credentials.username,
            key: Secret::derive(CATALOG_KEY_CONTEXT, credentials.passphrase.as_bytes()),
            caches: Arc::new(Caches::default()),
        };

        store
            .spawn_hydration(
                COLLECTION_BUCKETS,
                store.caches.clone(),
                |caches| &caches.buckets,
                |a: &BucketMetadata, b: &BucketMetadata| a.slug == b.slug,
            )
            .await?;
        store
            .spawn_hydration(
                COLLECTION_SHARED_WITH_ME,
                store.caches.clone(),
                |caches| &caches.shared_with_me,
                same_shared_file,
            )
            .await?;
        store
            .spawn_hydration(
                COLLECTION_SHARED_BY_ME,
                store.caches.clone(),
                |caches| &caches.shared_by_me,
                same_shared_file,
            )
            .await?;
        store
            .spawn_hydration(
                COLLECTION_RECENTLY_SHARED_WITH,
                store.caches.clone(),
                |caches| &caches.recently_shared_with,
                |a: &ShareUserMetadata, b: &ShareUserMetadata| a.public_key == b.public_key,
            )
            .await?;

        debug!(username = %store.username, "metadata store hydrating");
        tokio::time::sleep(config.hydration_window).await;

        Ok(store)
    }

    /// Subscribe to a list collection and keep the matching cache current
    ///
    /// Entries that fail to decrypt or parse are logged and skipped; one bad
    /// replicated entry must not poison the cache.
    async fn spawn_hydration<T, S, F>(
        &self,
        collection: &'static str,
        caches: Arc<Caches>,
        select: S,
        same: F,
    ) -> Result<(), StoreError>
    where
        T: DeserializeOwned + Send + 'static,
        S: Fn(&Caches) -> &Mutex<Vec<T>> + Send + 'static,
        F: Fn(&T, &T) -> bool + Send + 'static,
    {
        let rx = self.replica.subscribe(&self.username, collection).await?;
        let key = self.key.clone();

        tokio::spawn(async move {
            while let Ok(envelope) = rx.recv_async().await {
                match decrypt_entry::<T>(&key, &envelope) {
                    Ok(item) => {
                        let mut cache = select(&caches).lock();
                        match cache.iter().position(|existing| same(existing, &item)) {
                            Some(idx) => cache[idx] = item,
                            None => cache.push(item),
                        }
                    }
                    Err(e) => {
                        warn!(collection, error = %e, "skipping unreadable catalog entry")
                    }
                }
            }
        });
        Ok(())
    }

    fn seal<T: Serialize>(&self, value: &T) -> Result<Envelope, StoreError> {
        let plaintext = serde_json::to_vec(value)?;
        let ciphertext = self.key.encrypt(&plaintext)?;
        Ok(Envelope {
            data: hex::encode(ciphertext),
        })
    }

    fn open_envelope<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T, StoreError> {
        decrypt_entry(&self.key, envelope)
    }

    async fn put(&self, key: &str, envelope: Envelope) -> Result<(), StoreError> {
        Ok(self.replica.put(&self.username, key, envelope).await?)
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.replica.get(&self.username, key).await? {
            Some(envelope) => Ok(Some(self.open_envelope(&envelope)?)),
            None => Ok(None),
        }
    }

    async fn append(&self, collection: &str, envelope: Envelope) -> Result<(), StoreError> {
        Ok(self
            .replica
            .append(&self.username, collection, envelope)
            .await?)
    }

    // ---- buckets ----

    /// Record a new bucket in the catalog
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a bucket with this slug is
    /// already findable.
    pub async fn create_bucket(
        &self,
        slug: &str,
        db_id: &str,
        bucket_key: &str,
    ) -> Result<BucketMetadata, StoreError> {
        if self.find_bucket(slug).await?.is_some() {
            return Err(StoreError::AlreadyExists(slug.to_string()));
        }

        let metadata = BucketMetadata {
            db_id: db_id.to_string(),
            slug: slug.to_string(),
            bucket_key: bucket_key.to_string(),
        };
        let envelope = self.seal(&metadata)?;
        self.put(&bucket_lookup_key(slug, &self.username), envelope.clone())
            .await?;
        self.append(COLLECTION_BUCKETS, envelope).await?;

        debug!(slug, db_id, "bucket recorded");
        Ok(metadata)
    }

    /// Look up a bucket by slug; absence is not an error
    pub async fn find_bucket(&self, slug: &str) -> Result<Option<BucketMetadata>, StoreError> {
        self.get(&bucket_lookup_key(slug, &self.username)).await
    }

    /// Snapshot of the hydrated bucket cache, not a fresh read
    pub fn list_buckets(&self) -> Vec<BucketMetadata> {
        self.caches.buckets.lock().clone()
    }

    // ---- file metadata ----

    /// Merge-upsert file metadata at its primary key, mirroring to the uuid
    /// index when a uuid is present
    pub async fn upsert_file_metadata(
        &self,
        metadata: FileMetadata,
    ) -> Result<FileMetadata, StoreError> {
        let primary_key = file_lookup_key(&metadata.bucket_slug, &metadata.db_id, &metadata.path);
        let merged = match self.get::<FileMetadata>(&primary_key).await? {
            Some(existing) => existing.merge(metadata),
            None => metadata,
        };

        let envelope = self.seal(&merged)?;
        self.put(&primary_key, envelope.clone()).await?;
        if let Some(uuid) = &merged.uuid {
            self.put(&uuid_lookup_key(uuid), envelope).await?;
        }
        Ok(merged)
    }

    pub async fn find_file_metadata(
        &self,
        bucket_slug: &str,
        db_id: &str,
        path: &str,
    ) -> Result<Option<FileMetadata>, StoreError> {
        self.get(&file_lookup_key(bucket_slug, db_id, path)).await
    }

    /// Look up file metadata by uuid, falling back to the public partition
    ///
    /// The public copy is plaintext JSON written by [`set_file_public`]
    /// (possibly by another identity), so it is parsed without decryption.
    ///
    /// [`set_file_public`]: MetadataStore::set_file_public
    pub async fn find_file_metadata_by_uuid(
        &self,
        uuid: &str,
    ) -> Result<Option<FileMetadata>, StoreError> {
        if let Some(metadata) = self.get(&uuid_lookup_key(uuid)).await? {
            return Ok(Some(metadata));
        }
        match self
            .replica
            .get(&self.public_username, &uuid_lookup_key(uuid))
            .await?
        {
            Some(envelope) => Ok(Some(serde_json::from_str(&envelope.data)?)),
            None => Ok(None),
        }
    }

    /// Publish a plaintext copy of the metadata at the public partition's
    /// uuid key
    ///
    /// One-directional: there is no unpublish operation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingUuid` when the metadata has no uuid.
    pub async fn set_file_public(&self, metadata: &FileMetadata) -> Result<(), StoreError> {
        let uuid = metadata.uuid.as_deref().ok_or(StoreError::MissingUuid)?;
        let envelope = Envelope {
            data: serde_json::to_string(metadata)?,
        };
        self.replica
            .put(&self.public_username, &uuid_lookup_key(uuid), envelope)
            .await?;
        debug!(uuid, path = %metadata.path, "file metadata published");
        Ok(())
    }

    // ---- shares ----

    /// Merge-upsert a file shared with this identity
    ///
    /// Mirrors by invitation id when present, so the share can be found again
    /// from the invitation that delivered it.
    pub async fn upsert_shared_with_me_file(
        &self,
        shared: SharedFileMetadata,
    ) -> Result<SharedFileMetadata, StoreError> {
        let primary_key = file_lookup_key(
            &shared.file.bucket_slug,
            &shared.file.db_id,
            &shared.file.path,
        );
        let merged = match self.get::<SharedFileMetadata>(&primary_key).await? {
            Some(existing) => existing.merge(shared),
            None => shared,
        };

        let envelope = self.seal(&merged)?;
        self.put(&primary_key, envelope.clone()).await?;
        if let Some(invitation_id) = &merged.invitation_id {
            self.put(&invitation_lookup_key(invitation_id), envelope.clone())
                .await?;
        }
        self.append(COLLECTION_SHARED_WITH_ME, envelope).await?;
        Ok(merged)
    }

    /// Merge-upsert a file this identity shared out
    pub async fn upsert_shared_by_me_file(
        &self,
        shared: SharedFileMetadata,
    ) -> Result<SharedFileMetadata, StoreError> {
        let primary_key = shared_by_me_lookup_key(
            &shared.file.bucket_slug,
            &shared.file.db_id,
            &shared.file.path,
        );
        let merged = match self.get::<SharedFileMetadata>(&primary_key).await? {
            Some(existing) => existing.merge(shared),
            None => shared,
        };

        let envelope = self.seal(&merged)?;
        self.put(&primary_key, envelope.clone()).await?;
        self.append(COLLECTION_SHARED_BY_ME, envelope).await?;
        Ok(merged)
    }

    /// Record a user in the recently-shared-with registry
    pub async fn add_user_recently_shared_with(
        &self,
        user: ShareUserMetadata,
    ) -> Result<(), StoreError> {
        let envelope = self.seal(&user)?;
        self.put(&recently_shared_lookup_key(&user.public_key), envelope.clone())
            .await?;
        self.append(COLLECTION_RECENTLY_SHARED_WITH, envelope).await
    }

    /// Direct lookup by the invitation-indexed key
    pub async fn find_shared_files_by_invitation(
        &self,
        invitation_id: &str,
    ) -> Result<Option<SharedFileMetadata>, StoreError> {
        self.get(&invitation_lookup_key(invitation_id)).await
    }

    pub fn list_shared_with_me_files(&self) -> Vec<SharedFileMetadata> {
        self.caches.shared_with_me.lock().clone()
    }

    pub fn list_shared_by_me_files(&self) -> Vec<SharedFileMetadata> {
        self.caches.shared_by_me.lock().clone()
    }

    pub fn list_users_recently_shared_with(&self) -> Vec<ShareUserMetadata> {
        self.caches.recently_shared_with.lock().clone()
    }

    // ---- notifications ----

    /// Millisecond timestamp of the last notification the user has seen,
    /// `0` when never set
    pub async fn get_notifications_last_seen_at(&self) -> Result<u64, StoreError> {
        Ok(self
            .get::<u64>(NOTIFICATIONS_LAST_SEEN_KEY)
            .await?
            .unwrap_or(0))
    }

    pub async fn set_notifications_last_seen_at(&self, timestamp: u64) -> Result<(), StoreError> {
        let envelope = self.seal(&timestamp)?;
        self.put(NOTIFICATIONS_LAST_SEEN_KEY, envelope).await
    }
}

fn same_shared_file(a: &SharedFileMetadata, b: &SharedFileMetadata) -> bool {
    a.file.bucket_slug == b.file.bucket_slug
        && a.file.db_id == b.file.db_id
        && a.file.path == b.file.path
}

fn decrypt_entry<T: DeserializeOwned>(key: &Secret, envelope: &Envelope) -> Result<T, StoreError> {
    let ciphertext =
        hex::decode(&envelope.data).map_err(|_| anyhow::anyhow!("envelope hex decode error"))?;
    let plaintext = key.decrypt(&ciphertext)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

fn bucket_lookup_key(slug: &str, username: &str) -> String {
    format!("bucketSchema/{}/{}", slug, username)
}

fn file_lookup_key(bucket_slug: &str, db_id: &str, path: &str) -> String {
    format!("fileMetadata/{}/{}/{}", bucket_slug, db_id, path)
}

fn uuid_lookup_key(uuid: &str) -> String {
    format!("/fuuid/{}", uuid)
}

fn invitation_lookup_key(invitation_id: &str) -> String {
    format!("sharedFileIv/{}", invitation_id)
}

fn shared_by_me_lookup_key(bucket_slug: &str, db_id: &str, path: &str) -> String {
    format!("sharedByMe/{}/{}/{}", bucket_slug, db_id, path)
}

fn recently_shared_lookup_key(public_key: &str) -> String {
    format!("recentlySharedWith/{}", public_key)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::catalog::MemoryReplicaStore;
    use crate::identity::Identity;
    use crate::crypto::SecretKey;

    fn public_credentials() -> PublicStoreCredentials {
        PublicStoreCredentials {
            username: "public".to_string(),
            passphrase: "public-pw".to_string(),
        }
    }

    fn test_config() -> StoreConfig {
        StoreConfig::new(public_credentials()).with_hydration_window(Duration::from_millis(20))
    }

    async fn open_store(replica: Arc<dyn ReplicaStore>) -> MetadataStore {
        let identity = Identity::new(SecretKey::generate());
        MetadataStore::open(identity.store_credentials(), test_config(), replica)
            .await
            .unwrap()
    }

    fn file(path: &str) -> FileMetadata {
        FileMetadata {
            uuid: None,
            bucket_key: Some("bk".to_string()),
            bucket_slug: "personal".to_string(),
            db_id: "db-1".to_string(),
            path: path.to_string(),
            encryption_key: None,
            mime_type: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_bucket() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;

        assert!(store.find_bucket("docs").await.unwrap().is_none());
        store.create_bucket("docs", "db-1", "bk-1").await.unwrap();

        let found = store.find_bucket("docs").await.unwrap().unwrap();
        assert_eq!(found.db_id, "db-1");
        assert_eq!(found.bucket_key, "bk-1");

        let result = store.create_bucket("docs", "db-2", "bk-2").await;
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_bucket_cache_hydrates() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;
        store.create_bucket("docs", "db-1", "bk-1").await.unwrap();
        store.create_bucket("music", "db-2", "bk-2").await.unwrap();

        // the appends travel through the subscription task
        tokio::time::sleep(Duration::from_millis(50)).await;

        let buckets = store.list_buckets();
        assert_eq!(buckets.len(), 2);
        assert!(buckets.iter().any(|b| b.slug == "docs"));
        assert!(buckets.iter().any(|b| b.slug == "music"));
    }

    #[tokio::test]
    async fn test_upsert_merges_fields() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;

        let mut first = file("/a.txt");
        first.encryption_key = Some("aa".repeat(32));
        store.upsert_file_metadata(first).await.unwrap();

        let mut second = file("/a.txt");
        second.mime_type = Some("text/plain".to_string());
        store.upsert_file_metadata(second).await.unwrap();

        let found = store
            .find_file_metadata("personal", "db-1", "/a.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.encryption_key.as_deref(), Some(&*"aa".repeat(32)));
        assert_eq!(found.mime_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_uuid_index_matches_primary() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;

        let mut metadata = file("/a.txt");
        metadata.uuid = Some("uuid-1".to_string());
        store.upsert_file_metadata(metadata).await.unwrap();

        let by_path = store
            .find_file_metadata("personal", "db-1", "/a.txt")
            .await
            .unwrap()
            .unwrap();
        let by_uuid = store
            .find_file_metadata_by_uuid("uuid-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_path, by_uuid);
    }

    #[tokio::test]
    async fn test_public_partition_lookup() {
        let replica: Arc<dyn ReplicaStore> = Arc::new(MemoryReplicaStore::new());
        let publisher = open_store(replica.clone()).await;

        let mut metadata = file("/shared.txt");
        metadata.uuid = Some("uuid-pub".to_string());
        publisher.upsert_file_metadata(metadata.clone()).await.unwrap();
        publisher.set_file_public(&metadata).await.unwrap();

        // a different identity, no access to the publisher's private keyspace
        let reader = open_store(replica).await;
        let found = reader
            .find_file_metadata_by_uuid("uuid-pub")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.path, "/shared.txt");
    }

    #[tokio::test]
    async fn test_set_file_public_requires_uuid() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;
        let result = store.set_file_public(&file("/a.txt")).await;
        assert!(matches!(result, Err(StoreError::MissingUuid)));
    }

    #[tokio::test]
    async fn test_shared_with_me_invitation_index() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;

        let shared = SharedFileMetadata {
            file: file("/from-bob.txt"),
            invitation_id: Some("inv-1".to_string()),
        };
        store.upsert_shared_with_me_file(shared).await.unwrap();

        let found = store
            .find_shared_files_by_invitation("inv-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.file.path, "/from-bob.txt");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.list_shared_with_me_files().len(), 1);
    }

    #[tokio::test]
    async fn test_recently_shared_with_registry() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;

        let user = ShareUserMetadata {
            public_key: "pk-1".to_string(),
            role: None,
        };
        store.add_user_recently_shared_with(user.clone()).await.unwrap();
        // repeated shares with the same user collapse to one registry entry
        store.add_user_recently_shared_with(user).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.list_users_recently_shared_with().len(), 1);
    }

    #[tokio::test]
    async fn test_notifications_last_seen_defaults_to_zero() {
        let store = open_store(Arc::new(MemoryReplicaStore::new())).await;
        assert_eq!(store.get_notifications_last_seen_at().await.unwrap(), 0);

        store.set_notifications_last_seen_at(1234).await.unwrap();
        assert_eq!(store.get_notifications_last_seen_at().await.unwrap(), 1234);
    }

    #[tokio::test]
    async fn test_catalogs_are_isolated_per_identity() {
        let replica: Arc<dyn ReplicaStore> = Arc::new(MemoryReplicaStore::new());
        let alice = open_store(replica.clone()).await;
        let bob = open_store(replica).await;

        alice.create_bucket("docs", "db-1", "bk-1").await.unwrap();
        assert!(bob.find_bucket("docs").await.unwrap().is_none());
    }
}
