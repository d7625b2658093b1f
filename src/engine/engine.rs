use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{BucketMetadata, FileMetadata, MetadataStore, StoreError};
use crate::crypto::{KeyError, Secret, SecretError, SecretKey};
use crate::identity::{AuthContext, AuthError, CredentialIssuer, Identity};
use crate::paths::{
    is_top_level_path, join_path, parent_path, re_order_path_by_parents, sanitize_path,
    META_FILE_NAME,
};

use super::backend::{AccessRole, BackendError, BucketRoot, ContentBackend, UNBOUNDED_DEPTH};
use super::entry::{attach_members, flatten_paths, parse_path_items, DirectoryEntry};
use super::listener::ThreadListener;
use super::mailbox::{Mailbox, MailboxError, Messaging};
use super::notifications::{
    decode_body, encode_invitation, Notification, NotificationError, NotificationType,
};
use super::upload::{
    AddItemsFile, AddItemsRequest, AddItemsResultSummary, AddItemsStatus, UploadEvent,
};

/// Errors raised by the storage engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("storage engine error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
    #[error("metadata store error: {0}")]
    Store(#[from] StoreError),
    #[error("content backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
    #[error("notification error: {0}")]
    Notification(#[from] NotificationError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("key error: {0}")]
    Key(#[from] KeyError),
    #[error("directory entry not found: {path} in bucket {bucket}")]
    DirEntryNotFound { path: String, bucket: String },
    #[error("backend did not return a bucket root")]
    MissingBucketRoot,
}

/// A bucket with its catalog record and resolved backend root
#[derive(Debug, Clone)]
pub struct Bucket {
    pub metadata: BucketMetadata,
    pub root: BucketRoot,
}

/// A cross-bucket path reference, before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullPath {
    pub db_id: Option<String>,
    pub bucket: String,
    pub path: String,
}

/// A [`FullPath`] with its bucket root key resolved and its path sanitized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPath {
    pub key: String,
    pub full_path: FullPath,
}

/// Orchestrates bucket lifecycle, directory listing, uploads, and
/// temp-identity access migration
///
/// Translates bucket and file operations into content-backend calls,
/// reconciles backend state with the metadata catalog, and migrates access
/// grants between temporary and permanent identities. Cheap to clone.
#[derive(Clone)]
pub struct StorageEngine {
    identity: Identity,
    store: MetadataStore,
    backend: Arc<dyn ContentBackend>,
    messaging: Arc<dyn Messaging>,
    issuer: Arc<dyn CredentialIssuer>,
    listener: ThreadListener,
    mailbox: Arc<tokio::sync::Mutex<Option<Mailbox>>>,
}

impl StorageEngine {
    pub fn new(
        identity: Identity,
        store: MetadataStore,
        backend: Arc<dyn ContentBackend>,
        messaging: Arc<dyn Messaging>,
        issuer: Arc<dyn CredentialIssuer>,
    ) -> Self {
        Self {
            identity,
            store,
            backend,
            messaging,
            issuer,
            listener: ThreadListener::default(),
            mailbox: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Register every bucket already in the catalog with the thread listener
    pub fn init_listener(&self) {
        for bucket in self.store.list_buckets() {
            self.listener.add_listener(&bucket.db_id);
        }
    }

    pub fn listener(&self) -> &ThreadListener {
        &self.listener
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    fn auth(&self) -> Result<AuthContext, EngineError> {
        Ok(self.identity.auth()?.clone())
    }

    async fn mailbox(&self) -> Result<Mailbox, EngineError> {
        let mut guard = self.mailbox.lock().await;
        if let Some(mailbox) = &*guard {
            return Ok(mailbox.clone());
        }
        let mailbox = Mailbox::create(self.identity.clone(), self.messaging.clone()).await?;
        *guard = Some(mailbox.clone());
        Ok(mailbox)
    }

    /// Resolve a bucket by name, creating backend object and catalog record
    /// as needed
    ///
    /// A fresh random thread id is generated only when no catalog record
    /// exists; a second call with the same name resolves to the identical
    /// db id. The resolved thread id is registered with the listener.
    pub async fn get_or_create_bucket(&self, name: &str) -> Result<Bucket, EngineError> {
        let auth = self.auth()?;

        let existing = self.store.find_bucket(name).await?;
        let db_id = match &existing {
            Some(metadata) => metadata.db_id.clone(),
            None => random_thread_id(),
        };

        let response = self.backend.get_or_create(&auth, name, &db_id).await?;
        let root = response.root.ok_or(EngineError::MissingBucketRoot)?;

        let metadata = match existing {
            Some(metadata) => metadata,
            None => {
                info!(bucket = name, db_id = %db_id, "creating bucket");
                self.store.create_bucket(name, &db_id, &root.key).await?
            }
        };

        self.listener.add_listener(&metadata.db_id);
        Ok(Bucket { metadata, root })
    }

    /// List a directory, rebuilding the tree from the backend listing and the
    /// catalog
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DirEntryNotFound` when the backend reports the
    /// requested path missing; nested traversal failures propagate unchanged.
    pub async fn list_directory(
        &self,
        bucket_name: &str,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<DirectoryEntry>, EngineError> {
        let auth = self.auth()?;
        let bucket = self.get_or_create_bucket(bucket_name).await?;
        let path = sanitize_path(path);
        let depth = if recursive { UNBOUNDED_DEPTH } else { 0 };

        let item = match self
            .backend
            .list_path(&auth, &bucket.root.key, &path, depth)
            .await
        {
            Ok(item) => item,
            // only the requested top-level path classifies as missing
            Err(BackendError::PathNotFound(_)) => {
                return Err(EngineError::DirEntryNotFound {
                    path,
                    bucket: bucket_name.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if item.items.is_empty() {
            return Ok(Vec::new());
        }

        let metadata_map = self
            .file_metadata_map(&bucket.metadata.slug, &bucket.metadata.db_id, &item.items)
            .await?;
        let mut entries = parse_path_items(
            &item.items,
            &metadata_map,
            &bucket.metadata.slug,
            &bucket.metadata.db_id,
        )?;
        attach_members(&mut entries, &self.backend, &auth, &self.store, None).await?;
        Ok(entries)
    }

    /// One catalog lookup per path in the flattened fetched tree
    async fn file_metadata_map(
        &self,
        bucket_slug: &str,
        db_id: &str,
        items: &[super::backend::PathItem],
    ) -> Result<HashMap<String, FileMetadata>, EngineError> {
        let mut map = HashMap::new();
        for path in flatten_paths(items) {
            if let Some(metadata) = self
                .store
                .find_file_metadata(bucket_slug, db_id, &path)
                .await?
            {
                map.insert(path, metadata);
            }
        }
        Ok(map)
    }

    /// Create an empty folder at the path
    ///
    /// Persists a metadata placeholder for the reserved marker file at
    /// `{path}/.keep` and pushes an empty object there.
    pub async fn create_folder(&self, bucket_name: &str, path: &str) -> Result<(), EngineError> {
        let auth = self.auth()?;
        let bucket = self.get_or_create_bucket(bucket_name).await?;
        let keep_path = join_path(&sanitize_path(path), META_FILE_NAME);

        self.store
            .upsert_file_metadata(FileMetadata {
                uuid: Some(Uuid::new_v4().to_string()),
                bucket_key: Some(bucket.root.key.clone()),
                bucket_slug: bucket.metadata.slug.clone(),
                db_id: bucket.metadata.db_id.clone(),
                path: keep_path.clone(),
                encryption_key: Some(Secret::generate().to_hex()),
                mime_type: None,
            })
            .await?;

        self.backend
            .push_path(&auth, &bucket.root.key, &keep_path, b"", None)
            .await?;
        Ok(())
    }

    /// Upload a batch of files, streaming per-path events
    ///
    /// Returns the event receiver as soon as the bucket is resolved; the
    /// upload itself runs as a detached task. Directory levels are processed
    /// parent-before-child, files within a bucket strictly sequentially. One
    /// path's failure never aborts siblings or later directories; the
    /// terminal [`UploadEvent::Done`] carries every per-path status.
    pub async fn add_items(
        &self,
        request: AddItemsRequest,
    ) -> Result<flume::Receiver<UploadEvent>, EngineError> {
        self.auth()?;
        let bucket = self.get_or_create_bucket(&request.bucket).await?;
        let (tx, rx) = flume::unbounded();

        let engine = self.clone();
        tokio::spawn(async move {
            let summary = engine.upload_multiple_files(request, bucket, &tx).await;
            let _ = tx.send(UploadEvent::Done(summary));
        });

        Ok(rx)
    }

    async fn upload_multiple_files(
        &self,
        request: AddItemsRequest,
        bucket: Bucket,
        tx: &flume::Sender<UploadEvent>,
    ) -> AddItemsResultSummary {
        let mut summary = AddItemsResultSummary {
            bucket: request.bucket.clone(),
            files: Vec::new(),
        };

        let levels = re_order_path_by_parents(request.files, |file| &file.path);
        for dir_files in levels {
            // all files in a level share one directory, so the first path
            // determines the parent
            if !is_top_level_path(&dir_files[0].path) {
                let parent = parent_path(&dir_files[0].path);
                info!(path = %parent, "ensuring parent directory");

                let status = match self.ensure_parent_folder(&request.bucket, &bucket, &parent).await
                {
                    Ok(entry) => {
                        let status = AddItemsStatus::success(&parent, entry);
                        let _ = tx.send(UploadEvent::Data(status.clone()));
                        status
                    }
                    Err(e) => {
                        warn!(path = %parent, error = %e, "parent directory creation failed");
                        let status = AddItemsStatus::error(&parent, e.to_string());
                        let _ = tx.send(UploadEvent::Error(status.clone()));
                        status
                        // the level's files are still attempted; the summary
                        // records the folder failure
                    }
                };
                summary.files.push(status);
            }

            // strictly sequential within the bucket: the backend root is a
            // single mutable pointer
            for file in dir_files {
                let path = sanitize_path(&file.path);
                info!(path = %path, "uploading file");

                let status = match self.upload_file(&bucket, file, &path).await {
                    Ok(entry) => {
                        let status = AddItemsStatus::success(&path, entry);
                        let _ = tx.send(UploadEvent::Data(status.clone()));
                        status
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "file upload failed");
                        let status = AddItemsStatus::error(&path, e.to_string());
                        let _ = tx.send(UploadEvent::Error(status.clone()));
                        status
                    }
                };
                summary.files.push(status);
            }
        }

        summary
    }

    /// Create the parent folder and re-fetch its directory entry
    async fn ensure_parent_folder(
        &self,
        bucket_name: &str,
        bucket: &Bucket,
        parent: &str,
    ) -> Result<DirectoryEntry, EngineError> {
        let auth = self.auth()?;
        self.create_folder(bucket_name, parent).await?;

        let item = self
            .backend
            .list_path(&auth, &bucket.root.key, parent, 0)
            .await?;
        let mut entries = parse_path_items(
            std::slice::from_ref(&item),
            &HashMap::new(),
            &bucket.metadata.slug,
            &bucket.metadata.db_id,
        )?;
        attach_members(&mut entries, &self.backend, &auth, &self.store, None).await?;
        entries
            .pop()
            .ok_or_else(|| anyhow::anyhow!("folder entry missing after creation").into())
    }

    /// Push one file: metadata first, then the encrypted bytes, then the
    /// re-fetched entry
    async fn upload_file(
        &self,
        bucket: &Bucket,
        file: AddItemsFile,
        path: &str,
    ) -> Result<DirectoryEntry, EngineError> {
        let auth = self.auth()?;

        let mime_type = file.mime_type.clone().or_else(|| {
            mime_guess::from_path(path)
                .first()
                .map(|mime| mime.to_string())
        });

        // the content key is recorded before the push so the ciphertext is
        // never orphaned from its key
        let metadata = self
            .store
            .upsert_file_metadata(FileMetadata {
                uuid: Some(Uuid::new_v4().to_string()),
                bucket_key: Some(bucket.root.key.clone()),
                bucket_slug: bucket.metadata.slug.clone(),
                db_id: bucket.metadata.db_id.clone(),
                path: path.to_string(),
                encryption_key: Some(Secret::generate().to_hex()),
                mime_type,
            })
            .await?;

        // merged metadata wins: a re-upload keeps the original content key
        let content_key = metadata
            .encryption_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("file metadata missing encryption key"))?;
        let encrypted = Secret::from_hex(content_key)?.encrypt(&file.data)?;

        self.backend
            .push_path(&auth, &bucket.root.key, path, &encrypted, file.progress)
            .await?;

        let item = self
            .backend
            .list_path(&auth, &bucket.root.key, path, 0)
            .await?;
        let mut metadata_map = HashMap::new();
        metadata_map.insert(path.to_string(), metadata);
        let mut entries = parse_path_items(
            std::slice::from_ref(&item),
            &metadata_map,
            &bucket.metadata.slug,
            &bucket.metadata.db_id,
        )?;
        attach_members(&mut entries, &self.backend, &auth, &self.store, None).await?;
        entries
            .pop()
            .ok_or_else(|| anyhow::anyhow!("file entry missing after push").into())
    }

    /// Migrate access grants from a temporary identity to this one
    ///
    /// Authenticates as the ephemeral identity encoded by `temp_key`, drains
    /// its inbox, and for each invitation message: grants this identity admin
    /// access on every referenced path, revokes the ephemeral identity's
    /// access, rewrites the invitee, forwards the message to this identity's
    /// mailbox, and deletes the original. Non-invitation messages are
    /// forwarded untouched.
    pub async fn sync_from_temp_key(&self, temp_key: &str) -> Result<(), EngineError> {
        let temp_secret = SecretKey::from_hex(temp_key)?;
        let temp_auth = self.issuer.issue(&temp_secret).await?;
        let temp_identity = Identity::with_auth(temp_secret, temp_auth.clone());
        let temp_public_key = temp_identity.public_key_hex();

        let temp_mailbox =
            Mailbox::create(temp_identity, self.messaging.clone()).await?;
        let messages = temp_mailbox.list_inbox_messages().await?;
        if messages.is_empty() {
            info!("temp key inbox is empty, no syncing necessary");
            return Ok(());
        }
        debug!(count = messages.len(), "syncing temp key inbox");

        // make sure this identity's own inbox exists before forwarding
        self.mailbox().await?;
        let own_public_key = self.identity.public_key_hex();

        for message in messages {
            let mut body_to_forward = message.body.clone();
            let (notification_type, invitation) = decode_body(&message.body)?;

            if notification_type == NotificationType::Invitation {
                if let Some(mut invitation) = invitation {
                    for item_path in &invitation.item_paths {
                        let mut roles = BTreeMap::new();
                        roles.insert(own_public_key.clone(), AccessRole::Admin);
                        roles.insert(temp_public_key.clone(), AccessRole::Unspecified);
                        self.backend
                            .push_path_access_roles(
                                &temp_auth,
                                &item_path.bucket_key,
                                &item_path.path,
                                roles,
                            )
                            .await?;
                    }

                    invitation.invitee_public_key = own_public_key.clone();
                    body_to_forward = encode_invitation(&invitation)?;
                }
            }

            temp_mailbox
                .send_message(&self.identity.public(), &body_to_forward)
                .await?;
            temp_mailbox.delete_message(&message.id).await?;
        }
        Ok(())
    }

    /// Resolve a backend root key for each cross-bucket reference, sanitizing
    /// paths along the way
    pub async fn normalize_full_paths(
        &self,
        full_paths: Vec<FullPath>,
    ) -> Result<Vec<NormalizedPath>, EngineError> {
        let mut normalized = Vec::with_capacity(full_paths.len());
        for full_path in full_paths {
            let (key, db_id) = match &full_path.db_id {
                Some(db_id) => {
                    let metadata = self
                        .store
                        .find_file_metadata(&full_path.bucket, db_id, &full_path.path)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("bucket root not found for full path"))?;
                    (metadata.bucket_key.unwrap_or_default(), db_id.clone())
                }
                None => {
                    let bucket = self.get_or_create_bucket(&full_path.bucket).await?;
                    (bucket.root.key, bucket.metadata.db_id)
                }
            };

            normalized.push(NormalizedPath {
                key,
                full_path: FullPath {
                    db_id: Some(db_id),
                    bucket: full_path.bucket,
                    path: sanitize_path(&full_path.path),
                },
            });
        }
        Ok(normalized)
    }

    /// Subscribe to this identity's parsed notification stream
    pub async fn notification_subscribe(
        &self,
    ) -> Result<flume::Receiver<Notification>, EngineError> {
        let mailbox = self.mailbox().await?;
        Ok(mailbox.watch().await?)
    }
}

/// Random 32-byte replica-group id, hex encoded
fn random_thread_id() -> String {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).expect("failed to generate random bytes");
    hex::encode(bytes)
}
