//! Out-of-band file bytes for call results.
//!
//! A result carries only path and name for each file. The files are
//! registered here under the call id and fetched separately until they
//! expire.

use dashmap::DashMap;
use std::time::{Duration, Instant};

use busker_proto::Attachment;

use crate::dispatch::ResultFile;

#[derive(Debug)]
struct CallFiles {
    files: Vec<ResultFile>,
    registered_at: Instant,
}

#[derive(Debug, Default)]
pub struct AttachmentStore {
    calls: DashMap<String, CallFiles>,
}

impl AttachmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call's files and describe where to fetch them.
    pub fn register(&self, call_id: &str, files: Vec<ResultFile>) -> Vec<Attachment> {
        if files.is_empty() {
            return Vec::new();
        }

        let attachments = files
            .iter()
            .enumerate()
            .map(|(index, f)| Attachment {
                index,
                name: f.name.clone(),
                size: f.size,
                url: Attachment::path_for(call_id, index),
            })
            .collect();

        tracing::debug!(call_id = %call_id, count = files.len(), "Registered result attachments");
        self.calls.insert(
            call_id.to_string(),
            CallFiles {
                files,
                registered_at: Instant::now(),
            },
        );
        attachments
    }

    pub fn get(&self, call_id: &str, index: usize) -> Option<ResultFile> {
        self.calls
            .get(call_id)
            .and_then(|c| c.files.get(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Forget calls registered longer than `ttl` ago.
    pub fn cleanup(&self, ttl: Duration) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, c| c.registered_at.elapsed() <= ttl);
        let removed = before.saturating_sub(self.calls.len());
        if removed > 0 {
            tracing::info!(removed, remaining = self.calls.len(), "Expired result attachments");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str, size: u64) -> ResultFile {
        ResultFile {
            path: PathBuf::from(format!("/tmp/{}", name)),
            name: name.to_string(),
            size,
        }
    }

    #[test]
    fn register_numbers_files_in_order() {
        let store = AttachmentStore::new();
        let atts = store.register("call-1", vec![file("a.txt", 3), file("b.txt", 5)]);

        assert_eq!(atts.len(), 2);
        assert_eq!(atts[1].index, 1);
        assert_eq!(atts[1].url, "/attachments/call-1/1");
        assert_eq!(store.get("call-1", 0).unwrap().name, "a.txt");
        assert!(store.get("call-1", 2).is_none());
        assert!(store.get("call-2", 0).is_none());
    }

    #[test]
    fn empty_results_register_nothing() {
        let store = AttachmentStore::new();
        assert!(store.register("call-1", vec![]).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn cleanup_expires_by_age() {
        let store = AttachmentStore::new();
        store.register("call-1", vec![file("a.txt", 1)]);
        assert_eq!(store.cleanup(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.cleanup(Duration::ZERO), 1);
    }
}
