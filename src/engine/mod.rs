//! Storage-synchronization engine
//!
//! [`StorageEngine`] sits between a user's identity and a path-addressed,
//! access-controlled content backend:
//!
//! - **Bucket lifecycle**: [`StorageEngine::get_or_create_bucket`] resolves a
//!   bucket by name, minting a random thread id and a catalog record on first
//!   use
//! - **Directory listing**: rebuilds a [`DirectoryEntry`] tree by merging the
//!   backend's path listing with catalog metadata, then attaches access-role
//!   members per path
//! - **Uploads**: [`StorageEngine::add_items`] streams [`UploadEvent`]s from
//!   a detached task; directory levels go parent-before-child and failures
//!   stay isolated to their path
//! - **Access migration**: [`StorageEngine::sync_from_temp_key`] transfers
//!   grants issued to an ephemeral identity over to the permanent one
//!
//! The content backend and the secure-messaging transport are consumed
//! through the [`ContentBackend`] and [`Messaging`] traits;
//! [`MemoryContentBackend`] and [`MemoryMessaging`] are the in-crate
//! providers for tests and local use.

mod backend;
#[allow(clippy::module_inception)]
mod engine;
mod entry;
mod listener;
mod mailbox;
mod memory;
mod notifications;
mod upload;

pub use backend::{
    AccessRole, BackendError, BucketRoot, ContentBackend, GetOrCreateResponse, PathItem,
    ProgressCallback, UNBOUNDED_DEPTH,
};
pub use engine::{Bucket, EngineError, FullPath, NormalizedPath, StorageEngine};
pub use entry::{DirectoryEntry, FileMember};
pub use listener::ThreadListener;
pub use mailbox::{DecryptedMessage, Mailbox, MailboxError, MemoryMessaging, Messaging, SealedMessage};
pub use memory::MemoryContentBackend;
pub use notifications::{
    decode_body, encode_invitation, Invitation, InvitationPath, Notification, NotificationError,
    NotificationType,
};
pub use upload::{
    AddItemsFile, AddItemsRequest, AddItemsResultSummary, AddItemsStatus, UploadEvent,
    UploadStatus,
};
