use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::content::PostItem;

/// Live publish queue shared between the run loop and background deletions.
#[derive(Debug, Clone, Default)]
pub struct PostQueue {
    inner: Arc<Mutex<Vec<PostItem>>>,
}

impl PostQueue {
    pub fn new(items: Vec<PostItem>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(items)),
        }
    }

    pub fn snapshot(&self) -> Vec<PostItem> {
        self.lock().clone()
    }

    pub fn replace(&self, items: Vec<PostItem>) {
        *self.lock() = items;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Idempotent: returns whether anything was removed.
    pub fn remove(&self, source_dir: &Path) -> bool {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|item| item.source_dir != source_dir);
        guard.len() != before
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<PostItem>> {
        // A poisoned queue still holds valid items; keep serving them.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    Missing,
    OutsideRoot,
    Failed(String),
}

/// Deletes published posts in the background so the run loop never waits.
#[derive(Debug, Clone)]
pub struct CleanupScheduler {
    root: PathBuf,
    queue: PostQueue,
    tracker: TaskTracker,
}

impl CleanupScheduler {
    pub fn new<P: AsRef<Path>>(root: P, queue: PostQueue) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            queue,
            tracker: TaskTracker::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Fire-and-forget; the outcome is only logged.
    pub fn schedule_delete(&self, item: &PostItem) {
        let scheduler = self.clone();
        let item = item.clone();
        self.tracker.spawn(async move {
            match scheduler.delete_now(&item).await {
                CleanupOutcome::Deleted => {
                    info!(title = %item.title, "background cleanup finished");
                }
                outcome => {
                    warn!(title = %item.title, outcome = ?outcome, "background cleanup did not delete post");
                }
            }
        });
    }

    pub async fn delete_now(&self, item: &PostItem) -> CleanupOutcome {
        let target = match self.contained_path(&item.source_dir).await {
            Ok(target) => target,
            Err(outcome) => return outcome,
        };
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => {
                info!(path = %target.display(), "deleted published post directory");
                self.queue.remove(&item.source_dir);
                info!(remaining = self.queue.len(), "publish queue updated");
                CleanupOutcome::Deleted
            }
            Err(err) => {
                error!(path = %target.display(), error = %err, "failed to delete post directory");
                CleanupOutcome::Failed(err.to_string())
            }
        }
    }

    /// Waits for every scheduled deletion to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    async fn contained_path(&self, candidate: &Path) -> Result<PathBuf, CleanupOutcome> {
        let root = match tokio::fs::canonicalize(&self.root).await {
            Ok(root) => root,
            Err(err) => {
                error!(root = %self.root.display(), error = %err, "content root is not resolvable");
                return Err(CleanupOutcome::Failed(err.to_string()));
            }
        };
        let resolved = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let target = match tokio::fs::canonicalize(&resolved).await {
            Ok(target) => target,
            Err(_) => {
                warn!(path = %resolved.display(), "post directory no longer exists");
                return Err(CleanupOutcome::Missing);
            }
        };
        if target == root || !target.starts_with(&root) {
            error!(
                path = %target.display(),
                root = %root.display(),
                "refusing to delete directory outside the content root"
            );
            return Err(CleanupOutcome::OutsideRoot);
        }
        match tokio::fs::metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => Ok(target),
            Ok(_) => {
                error!(path = %target.display(), "post path is not a directory");
                Err(CleanupOutcome::Failed("not a directory".into()))
            }
            Err(err) => Err(CleanupOutcome::Failed(err.to_string())),
        }
    }
}
