use async_trait::async_trait;
use dashmap::DashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GraphRagError;

/// External, pollable cancellation flags keyed by task id.
#[async_trait]
pub trait CancelRegistry: Send + Sync {
    async fn has_canceled(&self, task_id: &str) -> bool;
}

/// Process-local registry.
#[derive(Default)]
pub struct MemoryCancelRegistry {
    canceled: DashSet<String>,
}

impl MemoryCancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, task_id: &str) {
        self.canceled.insert(task_id.to_string());
    }

    pub fn clear(&self, task_id: &str) {
        self.canceled.remove(task_id);
    }
}

#[async_trait]
impl CancelRegistry for MemoryCancelRegistry {
    async fn has_canceled(&self, task_id: &str) -> bool {
        self.canceled.contains(task_id)
    }
}

/// Receives coarse progress messages.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str) -> anyhow::Result<()>;
}

/// Sink that only logs.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, message: &str) -> anyhow::Result<()> {
        tracing::info!(progress = message);
        Ok(())
    }
}

/// Per-task handle threaded through every stage: cancellation checks plus
/// progress reporting.
#[derive(Clone)]
pub struct TaskContext {
    task_id: String,
    registry: Arc<dyn CancelRegistry>,
    progress: Arc<dyn ProgressSink>,
}

impl TaskContext {
    pub fn new(task_id: impl Into<String>, registry: Arc<dyn CancelRegistry>, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            task_id: task_id.into(),
            registry,
            progress,
        }
    }

    /// A context nothing can cancel, reporting to the log.
    pub fn detached(task_id: impl Into<String>) -> Self {
        Self::new(task_id, Arc::new(MemoryCancelRegistry::new()), Arc::new(LogProgress))
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn is_canceled(&self) -> bool {
        self.registry.has_canceled(&self.task_id).await
    }

    /// Fails with [`GraphRagError::TaskCanceled`] once the task is flagged.
    pub async fn checkpoint(&self, stage: &str) -> anyhow::Result<()> {
        if self.is_canceled().await {
            tracing::info!(task_id = %self.task_id, stage, "Cancellation observed");
            return Err(GraphRagError::TaskCanceled {
                task_id: self.task_id.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Sink failures are logged and dropped.
    pub fn progress(&self, message: &str) {
        if let Err(e) = self.progress.report(message) {
            tracing::warn!(task_id = %self.task_id, error = %e, "Progress sink failed");
        }
    }
}

/// Runs `work` under an optional ceiling. Exceeding it fails with
/// [`GraphRagError::Timeout`] naming `stage`; `None` never times out.
pub async fn with_deadline<T, F>(stage: &str, limit: Option<Duration>, work: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let Some(limit) = limit else {
        return work.await;
    };
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(GraphRagError::Timeout {
            stage: stage.to_string(),
            seconds: limit.as_secs(),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_canceled;

    struct BrokenSink;

    impl ProgressSink for BrokenSink {
        fn report(&self, _message: &str) -> anyhow::Result<()> {
            anyhow::bail!("sink offline")
        }
    }

    #[tokio::test]
    async fn test_checkpoint_raises_after_cancel() {
        let registry = Arc::new(MemoryCancelRegistry::new());
        let ctx = TaskContext::new("task-1", registry.clone(), Arc::new(LogProgress));

        assert!(ctx.checkpoint("start").await.is_ok());
        registry.cancel("task-1");
        let err = ctx.checkpoint("after extract").await.unwrap_err();
        assert!(is_canceled(&err));
    }

    #[tokio::test]
    async fn test_deadline_maps_elapsed_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        };
        let err = with_deadline("resolution", Some(Duration::from_millis(10)), slow).await.unwrap_err();
        assert_eq!(crate::FailureKind::classify(&err), crate::FailureKind::Timeout);

        let value = with_deadline("resolution", None, async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_broken_progress_sink_is_harmless() {
        let ctx = TaskContext::new("task-2", Arc::new(MemoryCancelRegistry::new()), Arc::new(BrokenSink));
        ctx.progress("still fine");
        assert!(ctx.checkpoint("next").await.is_ok());
    }
}
