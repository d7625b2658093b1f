use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Registry of replica-group ids watched for remote changes
///
/// Buckets register their thread id here as they are resolved; the
/// change-feed component consumes the registry. Cheap to clone, clones share
/// the registry.
#[derive(Debug, Clone, Default)]
pub struct ThreadListener {
    inner: Arc<Mutex<Vec<String>>>,
}

impl ThreadListener {
    pub fn new(thread_ids: Vec<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(thread_ids)),
        }
    }

    /// Register a thread id; re-registering is a no-op
    pub fn add_listener(&self, thread_id: &str) {
        let mut ids = self.inner.lock();
        if !ids.iter().any(|id| id == thread_id) {
            debug!(thread_id, "watching thread");
            ids.push(thread_id.to_string());
        }
    }

    pub fn is_watching(&self, thread_id: &str) -> bool {
        self.inner.lock().iter().any(|id| id == thread_id)
    }

    pub fn thread_ids(&self) -> Vec<String> {
        self.inner.lock().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_register_and_dedupe() {
        let listener = ThreadListener::new(vec!["t1".to_string()]);
        listener.add_listener("t2");
        listener.add_listener("t2");

        assert!(listener.is_watching("t1"));
        assert!(listener.is_watching("t2"));
        assert_eq!(listener.thread_ids().len(), 2);
    }

    #[test]
    fn test_clones_share_registry() {
        let listener = ThreadListener::default();
        let clone = listener.clone();
        clone.add_listener("t1");
        assert!(listener.is_watching("t1"));
    }
}
