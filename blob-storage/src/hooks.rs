use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// A callback run by the ingestion pipeline around each commit.
///
/// Hooks receive the canonical digest and a path to the bytes: the staging
/// file for pre-commit hooks, the committed blob for post-commit hooks.
/// A failing hook is logged; it never aborts the upload.
pub trait CommitHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn call(&self, digest: &str, path: &Path) -> anyhow::Result<()>;
}

impl<F> CommitHook for F
where
    F: Fn(&str, &Path) -> anyhow::Result<()> + Send + Sync,
{
    fn call(&self, digest: &str, path: &Path) -> anyhow::Result<()> {
        self(digest, path)
    }
}

/// Ordered, append-only lists of pre- and post-commit hooks.
#[derive(Default)]
pub struct HookRegistry {
    pre_commit: RwLock<Vec<Arc<dyn CommitHook>>>,
    post_commit: RwLock<Vec<Arc<dyn CommitHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre_commit(&self, hook: impl CommitHook + 'static) {
        self.pre_commit
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    pub fn register_post_commit(&self, hook: impl CommitHook + 'static) {
        self.post_commit
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Snapshot of the pre-commit hooks in registration order.
    ///
    /// The lock is released when this returns, so hooks invoked from the
    /// snapshot may register further hooks without deadlocking.
    pub fn pre_commit_hooks(&self) -> Vec<Arc<dyn CommitHook>> {
        self.pre_commit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Snapshot of the post-commit hooks in registration order.
    pub fn post_commit_hooks(&self) -> Vec<Arc<dyn CommitHook>> {
        self.post_commit
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("pre_commit", &self.pre_commit_hooks().len())
            .field("post_commit", &self.post_commit_hooks().len())
            .finish()
    }
}
