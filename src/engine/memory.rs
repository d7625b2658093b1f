use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::identity::AuthContext;
use crate::paths::sanitize_path;

use super::backend::{
    AccessRole, BackendError, BucketRoot, ContentBackend, GetOrCreateResponse, PathItem,
    ProgressCallback,
};

/// In-memory content backend
///
/// One path tree per bucket, implicit parent directories, per-path access
/// roles, nanosecond timestamps, blake3 content ids. Pushes to selected
/// paths can be scripted to fail, which the upload tests use to exercise
/// partial-failure isolation.
#[derive(Debug, Clone, Default)]
pub struct MemoryContentBackend {
    inner: Arc<Mutex<MemoryContentBackendInner>>,
}

#[derive(Debug, Default)]
struct MemoryContentBackendInner {
    buckets: Vec<BucketState>,
    fail_paths: HashSet<String>,
}

#[derive(Debug)]
struct BucketState {
    name: String,
    thread_id: String,
    root_key: String,
    owner: String,
    objects: BTreeMap<String, StoredObject>,
    roles: HashMap<String, BTreeMap<String, AccessRole>>,
}

#[derive(Debug)]
struct StoredObject {
    content: Vec<u8>,
    updated_at_ns: i64,
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

/// Public-key string behind an auth token, for default role maps
fn owner_key(auth: &AuthContext) -> String {
    auth.token
        .strip_prefix("local:")
        .unwrap_or(&auth.token)
        .to_string()
}

impl MemoryContentBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script every future push at this in-bucket path to fail
    pub fn fail_pushes_at(&self, path: &str) {
        self.inner.lock().fail_paths.insert(sanitize_path(path));
    }

    pub fn clear_push_failures(&self) {
        self.inner.lock().fail_paths.clear();
    }

    fn with_bucket<T>(
        &self,
        root_key: &str,
        f: impl FnOnce(&mut BucketState) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let mut inner = self.inner.lock();
        let bucket = inner
            .buckets
            .iter_mut()
            .find(|b| b.root_key == root_key)
            .ok_or_else(|| anyhow::anyhow!("unknown bucket root: {}", root_key))?;
        f(bucket)
    }
}

impl BucketState {
    fn contains_dir(&self, path: &str) -> bool {
        if path == "/" {
            return true;
        }
        let prefix = format!("{}/", path);
        self.objects.keys().any(|k| k.starts_with(&prefix))
    }

    /// Direct child paths of a directory, files and implicit subdirectories
    fn children_of(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        let mut children: Vec<String> = Vec::new();
        for key in self.objects.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let first = match rest.split('/').next() {
                    Some(segment) if !segment.is_empty() => segment,
                    _ => continue,
                };
                let child = format!("{}{}", prefix, first);
                if !children.contains(&child) {
                    children.push(child);
                }
            }
        }
        children
    }

    /// Build the reported item for a path, descending `levels` generations
    fn build_item(&self, path: &str, levels: u64) -> PathItem {
        let name = if path == "/" {
            self.name.clone()
        } else {
            path.rsplit('/').next().unwrap_or_default().to_string()
        };

        if let Some(object) = self.objects.get(path) {
            let cid = hex::encode(blake3::hash(&object.content).as_bytes());
            return PathItem {
                name,
                path: backend_path(&cid, path),
                cid,
                is_dir: false,
                count: 0,
                size: object.content.len() as u64,
                updated_at_ns: object.updated_at_ns,
                items: Vec::new(),
            };
        }

        // implicit directory
        let children = self.children_of(path);
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let mut size = 0;
        let mut updated_at_ns = 0;
        for (key, object) in &self.objects {
            if key.starts_with(&prefix) {
                size += object.content.len() as u64;
                updated_at_ns = updated_at_ns.max(object.updated_at_ns);
            }
        }

        let cid = hex::encode(blake3::hash(format!("{}:{}", self.thread_id, path).as_bytes()).as_bytes());
        let items = if levels == 0 {
            Vec::new()
        } else {
            children
                .iter()
                .map(|child| self.build_item(child, levels - 1))
                .collect()
        };

        PathItem {
            name,
            path: backend_path(&cid, path),
            cid,
            is_dir: true,
            count: children.len() as u64,
            size,
            updated_at_ns,
            items,
        }
    }
}

fn backend_path(cid: &str, path: &str) -> String {
    if path == "/" {
        format!("/ipfs/{}", cid)
    } else {
        format!("/ipfs/{}{}", cid, path)
    }
}

#[async_trait]
impl ContentBackend for MemoryContentBackend {
    async fn get_or_create(
        &self,
        auth: &AuthContext,
        name: &str,
        thread_id: &str,
    ) -> Result<GetOrCreateResponse, BackendError> {
        let mut inner = self.inner.lock();
        if let Some(bucket) = inner.buckets.iter().find(|b| b.name == name) {
            return Ok(GetOrCreateResponse {
                root: Some(BucketRoot {
                    key: bucket.root_key.clone(),
                }),
            });
        }

        let root_key = format!(
            "bucket-{}",
            &hex::encode(blake3::hash(thread_id.as_bytes()).as_bytes())[..16]
        );
        inner.buckets.push(BucketState {
            name: name.to_string(),
            thread_id: thread_id.to_string(),
            root_key: root_key.clone(),
            owner: owner_key(auth),
            objects: BTreeMap::new(),
            roles: HashMap::new(),
        });
        Ok(GetOrCreateResponse {
            root: Some(BucketRoot { key: root_key }),
        })
    }

    async fn push_path(
        &self,
        _auth: &AuthContext,
        root_key: &str,
        path: &str,
        content: &[u8],
        progress: Option<ProgressCallback>,
    ) -> Result<PathItem, BackendError> {
        let path = sanitize_path(path);
        if self.inner.lock().fail_paths.contains(&path) {
            return Err(anyhow::anyhow!("scripted push failure at {}", path).into());
        }

        if let Some(progress) = &progress {
            progress(content.len() as u64);
        }

        self.with_bucket(root_key, |bucket| {
            bucket.objects.insert(
                path.clone(),
                StoredObject {
                    content: content.to_vec(),
                    updated_at_ns: now_ns(),
                },
            );
            Ok(bucket.build_item(&path, 0))
        })
    }

    async fn list_path(
        &self,
        _auth: &AuthContext,
        root_key: &str,
        path: &str,
        depth: u64,
    ) -> Result<PathItem, BackendError> {
        let path = sanitize_path(path);
        self.with_bucket(root_key, |bucket| {
            if !bucket.objects.contains_key(&path) && !bucket.contains_dir(&path) {
                return Err(BackendError::PathNotFound(path.clone()));
            }
            // depth counts levels below the requested item's children
            Ok(bucket.build_item(&path, depth.saturating_add(1)))
        })
    }

    async fn pull_path_access_roles(
        &self,
        _auth: &AuthContext,
        root_key: &str,
        path: &str,
    ) -> Result<BTreeMap<String, AccessRole>, BackendError> {
        let path = sanitize_path(path);
        self.with_bucket(root_key, |bucket| {
            let mut roles = BTreeMap::new();
            roles.insert(bucket.owner.clone(), AccessRole::Admin);
            if let Some(explicit) = bucket.roles.get(&path) {
                for (key, role) in explicit {
                    roles.insert(key.clone(), *role);
                }
            }
            Ok(roles)
        })
    }

    async fn push_path_access_roles(
        &self,
        _auth: &AuthContext,
        root_key: &str,
        path: &str,
        roles: BTreeMap<String, AccessRole>,
    ) -> Result<(), BackendError> {
        let path = sanitize_path(path);
        self.with_bucket(root_key, |bucket| {
            let entry = bucket.roles.entry(path).or_default();
            for (key, role) in roles {
                entry.insert(key, role);
            }
            Ok(())
        })
    }
}
