//! The synchronizer: coalescing queue, serial worker, bounded retry.
//!
//! # Responsibilities
//! - Accept tree snapshots from the Set path and the initial load
//! - Run exactly one reconciliation at a time on a dedicated worker task
//! - Retry on push failures until superseded by a newer snapshot
//! - Reconcile deletions synchronously so the caller observes the result
//!
//! # Design Decisions
//! - A Forced request raises a sticky flag; the worker clears it and
//!   invalidates the cache before its next reconciliation. Cache writes
//!   stay on one task, and the invalidation survives snapshot coalescing
//! - A fatal translation error aborts the item without retry

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::sync::cache::PushCache;
use crate::sync::mailbox::Mailbox;
use crate::sync::mapper::{ModelInfo, SchemaMapper};
use crate::sync::pusher::{DisabledPusher, FilePusher, HttpPusher, PushError, Pusher};
use crate::tree::Path;

/// What a synchronization request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Reconcile the snapshot asynchronously.
    Apply,
    /// Reconcile the deletion synchronously on the caller's task.
    Delete,
    /// Invalidate the push cache, then reconcile the snapshot.
    Forced,
}

/// Error surfaced to the Set path.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("delete synchronization requires a path")]
    MissingPath,

    #[error("opening output file failed: {0}")]
    OutputFile(#[from] std::io::Error),

    #[error("building http client failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Push(#[from] PushError),
}

/// Reconciles tree snapshots into downstream pushes.
pub struct Synchronizer {
    mailbox: Arc<Mailbox<Value>>,
    cache: Arc<PushCache>,
    mapper: Arc<dyn SchemaMapper>,
    pusher: Arc<dyn Pusher>,
    /// Set by a Forced request, cleared by the worker. Sticky, so the
    /// invalidation is not lost when snapshots coalesce in the mailbox.
    forced: AtomicBool,
    retry_interval: Duration,
    post_timeout: Duration,
    post_enable: bool,
    output_file: Option<PathBuf>,
}

impl Synchronizer {
    pub fn new(mapper: Arc<dyn SchemaMapper>) -> Result<Self, SyncError> {
        let post_timeout = Duration::from_secs(10);
        Ok(Self {
            mailbox: Arc::new(Mailbox::new()),
            cache: Arc::new(PushCache::new()),
            mapper,
            pusher: Arc::new(HttpPusher::new(post_timeout)?),
            forced: AtomicBool::new(false),
            retry_interval: Duration::from_secs(5),
            post_timeout,
            post_enable: true,
            output_file: None,
        })
    }

    /// Enable or disable posting; when disabled pushes are logged no-ops.
    pub fn set_post_enable(&mut self, enable: bool) -> Result<(), SyncError> {
        self.post_enable = enable;
        self.rebuild_pusher()
    }

    /// Per-request timeout for the HTTP pusher.
    pub fn set_post_timeout(&mut self, timeout: Duration) -> Result<(), SyncError> {
        self.post_timeout = timeout;
        self.rebuild_pusher()
    }

    /// Write payloads to a file instead of pushing.
    pub fn set_output_file(&mut self, path: Option<PathBuf>) -> Result<(), SyncError> {
        self.output_file = path;
        self.rebuild_pusher()
    }

    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    fn rebuild_pusher(&mut self) -> Result<(), SyncError> {
        self.pusher = if let Some(path) = &self.output_file {
            Arc::new(FilePusher::create(path)?)
        } else if self.post_enable {
            Arc::new(HttpPusher::new(self.post_timeout)?)
        } else {
            Arc::new(DisabledPusher)
        };
        Ok(())
    }

    /// Models understood by the configured mapper.
    pub fn get_models(&self) -> Vec<ModelInfo> {
        self.mapper.models()
    }

    pub fn cache(&self) -> &PushCache {
        &self.cache
    }

    /// Pending plus in-flight work, for tests and introspection.
    pub fn busy(&self) -> usize {
        self.mailbox.busy()
    }

    /// Spawn the worker task. Call once after configuration is complete.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.worker().await;
        });
        tracing::info!("synchronizer worker started");
    }

    /// Hand a tree snapshot to the synchronizer.
    ///
    /// Apply and Forced deep-copy the snapshot and return immediately;
    /// Delete reconciles on this task and returns the downstream result.
    pub async fn synchronize(
        &self,
        tree: &Value,
        kind: SyncKind,
        path: Option<&Path>,
    ) -> Result<(), SyncError> {
        match kind {
            SyncKind::Delete => {
                let path = path.ok_or(SyncError::MissingPath)?;
                self.mapper
                    .reconcile_delete(path, &self.cache, self.pusher.as_ref())
                    .await?;
                Ok(())
            }
            SyncKind::Apply | SyncKind::Forced => {
                if kind == SyncKind::Forced {
                    self.forced.store(true, Ordering::SeqCst);
                }
                if self.mailbox.put(tree.clone()) {
                    tracing::debug!("snapshot displaced an undelivered one");
                }
                Ok(())
            }
        }
    }

    async fn worker(&self) {
        loop {
            let tree = self.mailbox.take().await;
            // Only this task mutates the cache between pushes.
            if self.forced.swap(false, Ordering::SeqCst) {
                self.cache.invalidate_all();
            }
            self.reconcile_with_retry(&tree).await;
            self.mailbox.complete();
        }
    }

    async fn reconcile_with_retry(&self, tree: &Value) {
        loop {
            match self
                .mapper
                .reconcile(tree, &self.cache, self.pusher.as_ref())
                .await
            {
                Err(fatal) => {
                    tracing::error!(error = %fatal, "reconciliation aborted");
                    return;
                }
                Ok(0) => {
                    tracing::debug!("reconciliation complete");
                    return;
                }
                Ok(failures) => {
                    tracing::warn!(
                        failures = failures,
                        retry_in = ?self.retry_interval,
                        "pushes failed, will retry"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    if self.mailbox.has_pending() {
                        tracing::info!("newer snapshot enqueued, abandoning retry");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMapper {
        reconciles: AtomicUsize,
        deletes: AtomicUsize,
        failures_first: AtomicUsize,
    }

    impl CountingMapper {
        fn new(failing_attempts: usize) -> Self {
            Self {
                reconciles: AtomicUsize::new(0),
                deletes: AtomicUsize::new(0),
                failures_first: AtomicUsize::new(failing_attempts),
            }
        }
    }

    #[async_trait]
    impl SchemaMapper for CountingMapper {
        fn models(&self) -> Vec<ModelInfo> {
            Vec::new()
        }

        async fn reconcile(
            &self,
            _tree: &Value,
            _cache: &PushCache,
            _pusher: &dyn Pusher,
        ) -> Result<usize, crate::sync::mapper::FatalSyncError> {
            self.reconciles.fetch_add(1, Ordering::SeqCst);
            if self.failures_first.load(Ordering::SeqCst) > 0 {
                self.failures_first.fetch_sub(1, Ordering::SeqCst);
                return Ok(1);
            }
            Ok(0)
        }

        async fn reconcile_delete(
            &self,
            _path: &Path,
            _cache: &PushCache,
            _pusher: &dyn Pusher,
        ) -> Result<(), PushError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_delete_is_synchronous() {
        let mapper = Arc::new(CountingMapper::new(0));
        let sync = Synchronizer::new(mapper.clone()).unwrap();
        let path = Path::parse("/site[site-id=s]/device-group[device-group-id=g]").unwrap();
        // No worker running; delete still completes on this task.
        sync.synchronize(&json!({}), SyncKind::Delete, Some(&path))
            .await
            .unwrap();
        assert_eq!(mapper.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_path() {
        let sync = Synchronizer::new(Arc::new(CountingMapper::new(0))).unwrap();
        let err = sync
            .synchronize(&json!({}), SyncKind::Delete, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingPath));
    }

    #[tokio::test]
    async fn test_worker_processes_newest_snapshot() {
        let mapper = Arc::new(CountingMapper::new(0));
        let sync = Arc::new(Synchronizer::new(mapper.clone()).unwrap());
        sync.synchronize(&json!({"v": 1}), SyncKind::Apply, None)
            .await
            .unwrap();
        sync.synchronize(&json!({"v": 2}), SyncKind::Apply, None)
            .await
            .unwrap();
        sync.start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while sync.busy() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // The first snapshot was displaced before the worker ran.
        assert_eq!(mapper.reconciles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let mapper = Arc::new(CountingMapper::new(2));
        let mut sync = Synchronizer::new(mapper.clone()).unwrap();
        sync.set_retry_interval(Duration::from_millis(10));
        let sync = Arc::new(sync);
        sync.start();
        sync.synchronize(&json!({}), SyncKind::Apply, None)
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while sync.busy() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        // Two failing attempts plus the successful one.
        assert_eq!(mapper.reconciles.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_forced_invalidates_cache_from_worker() {
        let mapper = Arc::new(CountingMapper::new(0));
        let sync = Arc::new(Synchronizer::new(mapper).unwrap());
        sync.cache().update("device-group", "g1", json!(1));
        sync.synchronize(&json!({}), SyncKind::Forced, None)
            .await
            .unwrap();
        assert_eq!(sync.cache().len(), 1);
        sync.start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while sync.busy() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(sync.cache().is_empty());
    }

    #[tokio::test]
    async fn test_forced_survives_snapshot_coalescing() {
        let mapper = Arc::new(CountingMapper::new(0));
        let sync = Arc::new(Synchronizer::new(mapper).unwrap());
        sync.cache().update("device-group", "g1", json!(1));
        // The Forced snapshot is displaced by a later Apply before the
        // worker runs; the invalidation must still happen.
        sync.synchronize(&json!({"v": 1}), SyncKind::Forced, None)
            .await
            .unwrap();
        sync.synchronize(&json!({"v": 2}), SyncKind::Apply, None)
            .await
            .unwrap();
        sync.start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while sync.busy() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(sync.cache().is_empty());
    }
}
