use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt as _;
use tokio::time::Instant;

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(1000);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cooperative lock shared by every process that writes a given resource.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Waits up to `max_wait` for the lock. `Ok(false)` means it stayed busy.
    async fn try_acquire(&self, resource_id: &str, max_wait: Duration) -> anyhow::Result<bool>;

    fn release(&self, resource_id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock on {resource_id} still held after {waited:?}")]
    Timeout {
        resource_id: String,
        waited: Duration,
    },
    #[error("lock provider failed for {resource_id}: {message}")]
    Provider {
        resource_id: String,
        message: String,
    },
}

/// Held lock; released when dropped, whichever way the scope is left.
pub struct LockGuard<'a> {
    provider: &'a dyn LockProvider,
    resource_id: String,
}

impl std::fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("resource_id", &self.resource_id)
            .finish_non_exhaustive()
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        tracing::debug!(resource_id = %self.resource_id, "releasing lock");
        if let Err(err) = self.provider.release(&self.resource_id) {
            tracing::error!(resource_id = %self.resource_id, ?err, "failed to release lock");
        }
    }
}

pub async fn acquire<'a>(
    provider: &'a dyn LockProvider,
    resource_id: &str,
    max_wait: Duration,
) -> Result<LockGuard<'a>, LockError> {
    tracing::debug!(resource_id, ?max_wait, "acquiring lock");
    let acquired = provider
        .try_acquire(resource_id, max_wait)
        .await
        .map_err(|err| LockError::Provider {
            resource_id: resource_id.to_owned(),
            message: format!("{err:#}"),
        })?;
    if !acquired {
        return Err(LockError::Timeout {
            resource_id: resource_id.to_owned(),
            waited: max_wait,
        });
    }
    tracing::debug!(resource_id, "locked");
    Ok(LockGuard {
        provider,
        resource_id: resource_id.to_owned(),
    })
}

/// Runs `f` while holding the lock on `resource_id`. `f` is never called when
/// the lock cannot be taken within `max_wait`.
pub async fn with_lock<T, F, Fut>(
    provider: &dyn LockProvider,
    resource_id: &str,
    max_wait: Duration,
    f: F,
) -> Result<T, LockError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = acquire(provider, resource_id, max_wait).await?;
    Ok(f().await)
}

#[derive(Debug, Default)]
pub struct InMemoryLockProvider {
    held: Mutex<HashSet<String>>,
}

impl InMemoryLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, resource_id: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(resource_id))
            .unwrap_or(false)
    }

    fn try_insert(&self, resource_id: &str) -> anyhow::Result<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
        Ok(held.insert(resource_id.to_owned()))
    }
}

#[async_trait]
impl LockProvider for InMemoryLockProvider {
    async fn try_acquire(&self, resource_id: &str, max_wait: Duration) -> anyhow::Result<bool> {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_insert(resource_id)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn release(&self, resource_id: &str) -> anyhow::Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|_| anyhow::anyhow!("lock table poisoned"))?;
        held.remove(resource_id);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockFile {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Lock files under `<base>/locks`, visible to every process sharing the
/// directory.
#[derive(Debug, Clone)]
pub struct LocalFsLockProvider {
    base_dir: PathBuf,
    stale_after: Option<Duration>,
}

impl LocalFsLockProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            stale_after: None,
        }
    }

    /// Lock files older than `stale_after` are assumed to be left over from a
    /// crashed run and are broken.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    fn lock_path(&self, resource_id: &str) -> PathBuf {
        let name = resource_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect::<String>();
        self.base_dir.join("locks").join(format!("{name}.lock"))
    }

    async fn try_create(&self, path: &Path) -> anyhow::Result<bool> {
        let contents = serde_json::to_vec(&LockFile {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        })
        .context("serialize lock file")?;

        let mut file = match fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("create lock file: {}", path.display()));
            }
        };
        file.write_all(&contents)
            .await
            .with_context(|| format!("write lock file: {}", path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("sync lock file: {}", path.display()))?;
        Ok(true)
    }

    /// How long the lock at `path` has been held, or `None` once it is gone.
    /// A body that does not parse (a holder that died before writing it) is
    /// aged by the file's mtime.
    async fn lock_age(path: &Path) -> anyhow::Result<Option<(Option<u32>, Duration)>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read lock file: {}", path.display()));
            }
        };
        if let Ok(lock) = serde_json::from_slice::<LockFile>(&bytes) {
            let age = Utc::now()
                .signed_duration_since(lock.acquired_at)
                .to_std()
                .unwrap_or_default();
            return Ok(Some((Some(lock.pid), age)));
        }

        let modified = match fs::metadata(path).await {
            Ok(metadata) => metadata
                .modified()
                .with_context(|| format!("read lock mtime: {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("stat lock file: {}", path.display()));
            }
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(Some((None, age)))
    }

    /// Removes the lock at `path` once it is older than `stale_after`. The
    /// removal happens under a `.break` side lock, with the age re-read while
    /// holding it, so a lock retaken by another contender is never removed.
    async fn break_if_stale(&self, path: &Path) -> anyhow::Result<()> {
        let Some(stale_after) = self.stale_after else {
            return Ok(());
        };
        if !Self::is_stale(path, stale_after).await? {
            return Ok(());
        }

        let breaker = path.with_extension("lock.break");
        if !self.try_create(&breaker).await? {
            if Self::is_stale(&breaker, stale_after).await? {
                tracing::warn!(path = %breaker.display(), "removing abandoned lock breaker");
                remove_if_present(&breaker).await?;
            }
            return Ok(());
        }

        let broken = match Self::lock_age(path).await {
            Ok(Some((pid, age))) if age > stale_after => {
                tracing::warn!(path = %path.display(), ?pid, ?age, "breaking stale lock");
                remove_if_present(path).await
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        remove_if_present(&breaker).await?;
        broken
    }

    async fn is_stale(path: &Path, stale_after: Duration) -> anyhow::Result<bool> {
        Ok(Self::lock_age(path)
            .await?
            .is_some_and(|(_, age)| age > stale_after))
    }
}

async fn remove_if_present(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove lock file: {}", path.display())),
    }
}

#[async_trait]
impl LockProvider for LocalFsLockProvider {
    async fn try_acquire(&self, resource_id: &str, max_wait: Duration) -> anyhow::Result<bool> {
        let path = self.lock_path(resource_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create lock dir: {}", parent.display()))?;
        }

        let deadline = Instant::now() + max_wait;
        loop {
            if self.try_create(&path).await? {
                return Ok(true);
            }
            self.break_if_stale(&path).await?;
            if self.try_create(&path).await? {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    // Called from `LockGuard::drop`, which cannot await.
    fn release(&self, resource_id: &str) -> anyhow::Result<()> {
        let path = self.lock_path(resource_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("remove lock file: {}", path.display())),
        }
    }
}
