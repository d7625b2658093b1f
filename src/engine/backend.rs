use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::identity::AuthContext;

/// Listing depth for a fully recursive fetch
pub const UNBOUNDED_DEPTH: u64 = u64::MAX;

/// Per-file progress callback, invoked with the number of bytes pushed so far
pub type ProgressCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Errors raised by a content backend provider
///
/// `PathNotFound` is a structured variant so callers never have to sniff
/// error message text to classify a missing path.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("content backend error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("path not found: {0}")]
    PathNotFound(String),
}

/// Role an identity holds on a path subtree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessRole {
    Unspecified,
    Reader,
    Writer,
    Admin,
}

/// The mutable root pointer of a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRoot {
    pub key: String,
}

/// Response of [`ContentBackend::get_or_create`]; a missing root is a
/// backend-side failure the engine surfaces explicitly
#[derive(Debug, Clone)]
pub struct GetOrCreateResponse {
    pub root: Option<BucketRoot>,
}

/// A path-addressed object as the backend reports it
///
/// `path` is the backend's content-addressed form (`/ipfs/<cid>/a/b.txt`);
/// `updated_at_ns` is a nanosecond timestamp. `items` holds children down to
/// the requested listing depth.
#[derive(Debug, Clone, Default)]
pub struct PathItem {
    pub name: String,
    pub path: String,
    pub cid: String,
    pub is_dir: bool,
    pub count: u64,
    pub size: u64,
    pub updated_at_ns: i64,
    pub items: Vec<PathItem>,
}

/// The storage network exposing path-addressed objects with per-path access
/// roles
///
/// Consumed, never implemented against a concrete network here;
/// [`MemoryContentBackend`](super::MemoryContentBackend) is the in-crate
/// provider for tests and local use. Every call carries the caller's bearer
/// credentials so one backend instance can serve several identities.
#[async_trait]
pub trait ContentBackend: Send + Sync + 'static {
    /// Resolve a bucket by name, creating it under the given replica-group id
    /// when absent
    async fn get_or_create(
        &self,
        auth: &AuthContext,
        name: &str,
        thread_id: &str,
    ) -> Result<GetOrCreateResponse, BackendError>;

    /// Write an object at a path, creating intermediate directories
    async fn push_path(
        &self,
        auth: &AuthContext,
        root_key: &str,
        path: &str,
        content: &[u8],
        progress: Option<ProgressCallback>,
    ) -> Result<PathItem, BackendError>;

    /// Fetch the item at a path with children down to `depth` levels
    ///
    /// # Errors
    ///
    /// Returns `BackendError::PathNotFound` when the path does not exist in
    /// the bucket.
    async fn list_path(
        &self,
        auth: &AuthContext,
        root_key: &str,
        path: &str,
        depth: u64,
    ) -> Result<PathItem, BackendError>;

    /// Access roles on a path, keyed by public-key string
    async fn pull_path_access_roles(
        &self,
        auth: &AuthContext,
        root_key: &str,
        path: &str,
    ) -> Result<BTreeMap<String, AccessRole>, BackendError>;

    /// Merge role assignments into a path's access map
    ///
    /// Assigning `AccessRole::Unspecified` revokes a previously granted role.
    async fn push_path_access_roles(
        &self,
        auth: &AuthContext,
        root_key: &str,
        path: &str,
        roles: BTreeMap<String, AccessRole>,
    ) -> Result<(), BackendError>;
}
