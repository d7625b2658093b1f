use std::collections::HashMap;
use std::sync::Arc;

use chrono::{SecondsFormat, TimeZone, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::catalog::{FileMetadata, MetadataStore};
use crate::identity::AuthContext;
use crate::paths::{file_path_from_backend_path, is_meta_file_name};

use super::backend::{AccessRole, ContentBackend, PathItem};
use super::engine::EngineError;

/// An identity holding a role on a directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMember {
    pub public_key: String,
    pub role: AccessRole,
}

/// A node of the reconstructed directory tree
///
/// Derived at read time by merging the backend's path listing with catalog
/// metadata; never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub is_dir: bool,
    pub count: u64,
    pub path: String,
    pub ipfs_hash: String,
    pub size_in_bytes: u64,
    /// RFC 3339, second precision. The backend only reports an update time,
    /// so both fields carry it.
    pub created: String,
    pub updated: String,
    pub file_extension: String,
    /// Catalog uuid for the path, empty when no metadata exists yet
    pub uuid: String,
    pub members: Vec<FileMember>,
    pub items: Vec<DirectoryEntry>,
    pub bucket: String,
    pub db_id: String,
}

/// Every in-bucket path in a fetched tree, depth first
pub(crate) fn flatten_paths(items: &[PathItem]) -> Vec<String> {
    let mut paths = Vec::new();
    for item in items {
        if let Some(path) = file_path_from_backend_path(&item.path) {
            paths.push(path);
        }
        paths.extend(flatten_paths(&item.items));
    }
    paths
}

/// Convert backend path items into directory entries
///
/// Filters reserved marker files, recovers in-bucket paths from the backend's
/// content-addressed form, converts nanosecond timestamps to RFC 3339, and
/// attaches uuids from the supplied path-to-metadata map.
pub(crate) fn parse_path_items(
    items: &[PathItem],
    metadata_map: &HashMap<String, FileMetadata>,
    bucket: &str,
    db_id: &str,
) -> Result<Vec<DirectoryEntry>, EngineError> {
    let mut entries = Vec::new();
    for item in items {
        if is_meta_file_name(&item.name) {
            continue;
        }

        let path = file_path_from_backend_path(&item.path)
            .ok_or_else(|| anyhow::anyhow!("unable to parse backend path: {}", item.path))?;

        // the backend reports nanoseconds
        let millis = item.updated_at_ns / 1_000_000;
        let updated = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| anyhow::anyhow!("invalid timestamp on bucket item: {}", millis))?
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let file_extension = if item.name.contains('.') {
            item.name.rsplit('.').next().unwrap_or_default().to_string()
        } else {
            String::new()
        };

        entries.push(DirectoryEntry {
            name: item.name.clone(),
            is_dir: item.is_dir,
            count: item.count,
            ipfs_hash: item.cid.clone(),
            size_in_bytes: item.size,
            created: updated.clone(),
            updated,
            file_extension,
            uuid: metadata_map
                .get(&path)
                .and_then(|m| m.uuid.clone())
                .unwrap_or_default(),
            path,
            members: Vec::new(),
            items: parse_path_items(&item.items, metadata_map, bucket, db_id)?,
            bucket: bucket.to_string(),
            db_id: db_id.to_string(),
        });
    }
    Ok(entries)
}

/// Attach member lists by querying the backend per path
///
/// One sequential round trip per tree node, descending into an item's
/// children only when the item itself had members. The bucket key is
/// resolved from the catalog when the caller does not supply one.
pub(crate) fn attach_members<'a>(
    entries: &'a mut [DirectoryEntry],
    backend: &'a Arc<dyn ContentBackend>,
    auth: &'a AuthContext,
    store: &'a MetadataStore,
    bucket_key: Option<String>,
) -> BoxFuture<'a, Result<(), EngineError>> {
    Box::pin(async move {
        if entries.is_empty() {
            return Ok(());
        }

        let key = match bucket_key {
            Some(key) => key,
            None => store
                .find_bucket(&entries[0].bucket)
                .await?
                .ok_or_else(|| anyhow::anyhow!("unable to find bucket metadata"))?
                .bucket_key,
        };

        for entry in entries.iter_mut() {
            let roles = backend
                .pull_path_access_roles(auth, &key, &entry.path)
                .await?;
            if roles.is_empty() {
                continue;
            }

            entry.members = roles
                .into_iter()
                .map(|(public_key, role)| FileMember { public_key, role })
                .collect();

            if !entry.items.is_empty() {
                attach_members(&mut entry.items, backend, auth, store, Some(key.clone()))
                    .await?;
            }
        }
        Ok(())
    })
}
