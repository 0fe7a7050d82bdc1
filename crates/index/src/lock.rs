use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use graph::GraphRagError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Exclusive lease-based lock. A lease that outlives its timeout may be taken
/// over by another acquirer.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Blocks with backoff until the lock is held.
    async fn spin_acquire(&self) -> Result<()>;

    /// Fails with [`GraphRagError::LockTimeout`] if the lease was lost.
    async fn release(&self) -> Result<()>;
}

/// Hands out locks, constructed from (lock_name, lock_value, lease_timeout).
pub trait LockService: Send + Sync {
    fn lock(&self, name: &str, value: &str, lease: Duration) -> Box<dyn DistributedLock>;
}

pub fn graph_lock_name(kb_id: &str) -> String {
    format!("graphrag_task_{kb_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    pub lease_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// None waits forever.
    pub acquire_timeout_secs: Option<u64>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_secs: 20 * 60,
            initial_backoff_ms: 100,
            max_backoff_ms: 2000,
            acquire_timeout_secs: None,
        }
    }
}

impl LockConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

#[derive(Debug, Clone)]
struct Lease {
    value: String,
    expires_at: Instant,
}

/// Lock service backed by a process-wide lease table.
#[derive(Clone, Default)]
pub struct LocalLockService {
    leases: Arc<DashMap<String, Lease>>,
    config: LockConfig,
}

impl LocalLockService {
    pub fn new(config: LockConfig) -> Self {
        Self {
            leases: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn is_held(&self, name: &str) -> bool {
        self.leases
            .get(name)
            .map(|lease| lease.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

impl LockService for LocalLockService {
    fn lock(&self, name: &str, value: &str, lease: Duration) -> Box<dyn DistributedLock> {
        Box::new(LocalLock {
            leases: self.leases.clone(),
            name: name.to_string(),
            value: value.to_string(),
            lease,
            config: self.config.clone(),
        })
    }
}

pub struct LocalLock {
    leases: Arc<DashMap<String, Lease>>,
    name: String,
    value: String,
    lease: Duration,
    config: LockConfig,
}

impl LocalLock {
    fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let fresh = Lease {
            value: self.value.clone(),
            expires_at: now + self.lease,
        };
        match self.leases.entry(self.name.clone()) {
            Entry::Occupied(mut held) => {
                if held.get().expires_at <= now {
                    warn!(lock = %self.name, "Taking over expired lease");
                    held.insert(fresh);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                true
            }
        }
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn spin_acquire(&self) -> Result<()> {
        let started = Instant::now();
        let deadline = self.config.acquire_timeout_secs.map(|s| started + Duration::from_secs(s));
        let mut backoff = Duration::from_millis(self.config.initial_backoff_ms.max(1));
        let max_backoff = Duration::from_millis(self.config.max_backoff_ms.max(1));

        loop {
            if self.try_acquire() {
                debug!(lock = %self.name, waited_ms = started.elapsed().as_millis() as u64, "Lock acquired");
                return Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(GraphRagError::LockTimeout {
                    lock_name: self.name.clone(),
                }
                .into());
            }

            let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
            sleep(backoff + Duration::from_millis(jitter)).await;
            backoff = std::cmp::min(backoff * 2, max_backoff);
        }
    }

    async fn release(&self) -> Result<()> {
        let removed = self.leases.remove_if(&self.name, |_, lease| lease.value == self.value);
        if removed.is_none() {
            return Err(GraphRagError::LockTimeout {
                lock_name: self.name.clone(),
            }
            .into());
        }
        debug!(lock = %self.name, "Lock released");
        Ok(())
    }
}

/// Runs `section` while holding `lock`. The lock is released whatever the
/// outcome; the section's own error wins over a release error.
pub async fn with_lock<T, F, Fut>(lock: &dyn DistributedLock, section: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    lock.spin_acquire().await?;
    let result = section().await;
    let released = lock.release().await;

    match (result, released) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release_err)) => {
            warn!(error = %release_err, "Lock release failed after section error");
            Err(e)
        }
    }
}
