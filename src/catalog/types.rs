use serde::{Deserialize, Serialize};

/// Catalog record for a bucket owned by an identity
///
/// Created once, on the first `get_or_create_bucket` that finds no existing
/// record, and never deleted. `slug` is unique within an identity's catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketMetadata {
    pub db_id: String,
    pub slug: String,
    pub bucket_key: String,
}

/// Catalog record for a file or folder marker
///
/// Keyed by `(bucket_slug, db_id, path)` and, once a uuid is assigned, also by
/// that uuid. Writes are merge-upserts: see [`FileMetadata::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_key: Option<String>,
    pub bucket_slug: String,
    pub db_id: String,
    pub path: String,
    /// Hex-encoded per-file content key, recorded before the file's bytes are
    /// pushed so the ciphertext is never orphaned from its key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl FileMetadata {
    /// Shallow-merge `newer` over `self`
    ///
    /// Optional fields set in `newer` win, fields omitted from `newer` retain
    /// the existing value. A uuid, once assigned, is never replaced.
    pub fn merge(self, newer: FileMetadata) -> FileMetadata {
        FileMetadata {
            uuid: self.uuid.or(newer.uuid),
            bucket_key: newer.bucket_key.or(self.bucket_key),
            bucket_slug: newer.bucket_slug,
            db_id: newer.db_id,
            path: newer.path,
            encryption_key: newer.encryption_key.or(self.encryption_key),
            mime_type: newer.mime_type.or(self.mime_type),
        }
    }
}

/// A file shared across identities, indexed additionally by invitation id
/// when the share arrived through one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedFileMetadata {
    #[serde(flatten)]
    pub file: FileMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invitation_id: Option<String>,
}

impl SharedFileMetadata {
    pub fn merge(self, newer: SharedFileMetadata) -> SharedFileMetadata {
        SharedFileMetadata {
            invitation_id: newer.invitation_id.or(self.invitation_id),
            file: self.file.merge(newer.file),
        }
    }
}

/// Entry in the recently-shared-with registry, keyed by public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareUserMetadata {
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}
