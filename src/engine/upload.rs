use super::backend::ProgressCallback;
use super::entry::DirectoryEntry;

/// One file queued for upload
///
/// `mime_type` is optional; when absent it is guessed from the path before
/// the metadata record is written.
pub struct AddItemsFile {
    pub path: String,
    pub data: Vec<u8>,
    pub mime_type: Option<String>,
    pub progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for AddItemsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddItemsFile")
            .field("path", &self.path)
            .field("bytes", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// An upload batch into one bucket
#[derive(Debug)]
pub struct AddItemsRequest {
    pub bucket: String,
    pub files: Vec<AddItemsFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Success,
    Error,
}

/// Outcome of one path in an upload batch: a pushed file or an ensured
/// parent folder
#[derive(Debug, Clone)]
pub struct AddItemsStatus {
    pub path: String,
    pub status: UploadStatus,
    /// Set when `status` is `Error`
    pub error: Option<String>,
    /// The re-fetched directory entry, set on success
    pub entry: Option<DirectoryEntry>,
}

impl AddItemsStatus {
    pub(crate) fn success(path: &str, entry: DirectoryEntry) -> Self {
        Self {
            path: path.to_string(),
            status: UploadStatus::Success,
            error: None,
            entry: Some(entry),
        }
    }

    pub(crate) fn error(path: &str, error: String) -> Self {
        Self {
            path: path.to_string(),
            status: UploadStatus::Error,
            error: Some(error),
            entry: None,
        }
    }
}

/// Aggregate of every per-path status, emitted once the whole batch has been
/// processed
#[derive(Debug, Clone)]
pub struct AddItemsResultSummary {
    pub bucket: String,
    pub files: Vec<AddItemsStatus>,
}

/// Events streamed by [`StorageEngine::add_items`]
///
/// `Data` and `Error` arrive per path; one `Done` with the summary is the
/// terminal event. A path can fail without aborting the rest of the batch,
/// so a receiver must not treat `Error` as terminal.
///
/// [`StorageEngine::add_items`]: super::StorageEngine::add_items
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Data(AddItemsStatus),
    Error(AddItemsStatus),
    Done(AddItemsResultSummary),
}
