//! Single-flight digest cache for the sender.
//!
//! The first request for a path starts one hashing pass in the background.
//! While it runs, async callers get [`DigestStatus::Pending`] immediately and
//! blocking callers wait on a condition variable. The result, digest or
//! error, is published once and served for the rest of the process lifetime;
//! shared files are assumed not to change while they are being offered.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::hasher::{hash_file, Digest};

/// Outcome of a finished hashing pass. Errors are shared by every waiter.
pub type DigestResult = std::result::Result<Digest, Arc<io::Error>>;

/// What an async caller gets back from [`DigestCache::request`].
#[derive(Debug, Clone)]
pub enum DigestStatus {
    /// Hashing finished
    Ready(DigestResult),
    /// Hashing is still running
    Pending,
}

#[derive(Debug)]
enum Entry {
    InFlight,
    Ready(DigestResult),
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<PathBuf, Entry>>,
    published: Condvar,
    passes: AtomicUsize,
}

/// Cache of file digests keyed by path.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct DigestCache {
    inner: Arc<Inner>,
}

impl DigestCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking lookup for request handlers.
    ///
    /// The first call for `path` schedules the hashing pass on the blocking
    /// thread pool and reports `Pending`. Must be called from within a Tokio
    /// runtime.
    pub fn request(&self, path: &Path) -> DigestStatus {
        let mut entries = self.lock();
        match entries.get(path) {
            Some(Entry::Ready(result)) => DigestStatus::Ready(result.clone()),
            Some(Entry::InFlight) => DigestStatus::Pending,
            None => {
                entries.insert(path.to_path_buf(), Entry::InFlight);
                drop(entries);

                let cache = self.clone();
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || cache.compute_and_publish(&path));
                DigestStatus::Pending
            }
        }
    }

    /// Blocking lookup for background tasks.
    ///
    /// Returns the cached result, waits for an in-flight pass, or runs the
    /// pass on the calling thread when nobody else has started one.
    pub fn blocking_get(&self, path: &Path) -> DigestResult {
        let mut entries = self.lock();
        loop {
            match entries.get(path) {
                Some(Entry::Ready(result)) => return result.clone(),
                Some(Entry::InFlight) => {
                    entries = self
                        .inner
                        .published
                        .wait(entries)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                None => {
                    entries.insert(path.to_path_buf(), Entry::InFlight);
                    drop(entries);
                    return self.compute_and_publish(path);
                }
            }
        }
    }

    /// Number of hashing passes started so far, across all paths.
    #[must_use]
    pub fn passes(&self) -> usize {
        self.inner.passes.load(Ordering::SeqCst)
    }

    fn compute_and_publish(&self, path: &Path) -> DigestResult {
        self.inner.passes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(path = %path.display(), "Hashing shared file");

        let result = hash_file(path).map_err(Arc::new);
        match &result {
            Ok(digest) => {
                tracing::info!(path = %path.display(), digest = %digest, "Digest ready");
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Hashing failed");
            }
        }

        self.lock()
            .insert(path.to_path_buf(), Entry::Ready(result.clone()));
        self.inner.published.notify_all();
        result
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Entry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    use crate::hasher::hash_bytes;

    #[test]
    fn test_blocking_get_computes_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.bin");
        std::fs::write(&path, vec![7u8; 300_000]).unwrap();

        let cache = DigestCache::new();
        let first = cache.blocking_get(&path).unwrap();
        let second = cache.blocking_get(&path).unwrap();

        assert_eq!(first, second);
        assert_eq!(first, hash_bytes(&vec![7u8; 300_000]));
        assert_eq!(cache.passes(), 1);
    }

    #[test]
    fn test_concurrent_blocking_callers_share_one_pass() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.bin");
        std::fs::write(&path, vec![3u8; 2 * 1024 * 1024]).unwrap();

        let cache = DigestCache::new();
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                let path = path.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.blocking_get(&path).unwrap()
                })
            })
            .collect();

        let digests: Vec<Digest> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.passes(), 1);
    }

    #[test]
    fn test_error_is_published_and_not_retried() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.bin");

        let cache = DigestCache::new();
        assert!(cache.blocking_get(&path).is_err());

        std::fs::write(&path, b"now it exists").unwrap();
        assert!(cache.blocking_get(&path).is_err());
        assert_eq!(cache.passes(), 1);
    }

    #[tokio::test]
    async fn test_request_reports_pending_then_ready() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.bin");
        std::fs::write(&path, b"content").unwrap();

        let cache = DigestCache::new();
        assert!(matches!(cache.request(&path), DigestStatus::Pending));

        let waiter = cache.clone();
        let waited_path = path.clone();
        let digest = tokio::task::spawn_blocking(move || waiter.blocking_get(&waited_path))
            .await
            .unwrap()
            .unwrap();

        match cache.request(&path) {
            DigestStatus::Ready(Ok(ready)) => assert_eq!(ready, digest),
            other => panic!("expected ready digest, got {other:?}"),
        }
        assert_eq!(cache.passes(), 1);
    }

    #[tokio::test]
    async fn test_paths_are_independent() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let cache = DigestCache::new();
        let da = cache.blocking_get(&a).unwrap();
        let db = cache.blocking_get(&b).unwrap();
        assert_ne!(da, db);
        assert_eq!(cache.passes(), 2);
    }
}
