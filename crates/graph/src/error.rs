use serde::{Deserialize, Serialize};

/// Failures the pipeline distinguishes. They travel inside `anyhow::Error`
/// and are recovered with [`FailureKind::classify`] or [`is_canceled`].
#[derive(Debug, thiserror::Error)]
pub enum GraphRagError {
    #[error("extraction failed for document {document_id}: {reason}")]
    Extraction { document_id: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("lock '{lock_name}' lease expired before release")]
    LockTimeout { lock_name: String },

    #[error("task {task_id} canceled")]
    TaskCanceled { task_id: String },

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: String, seconds: u64 },

    #[error("collaborator contract violated: {0}")]
    Contract(String),
}

impl GraphRagError {
    pub fn extraction(document_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Extraction {
            document_id: document_id.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Extraction,
    Store,
    LockTimeout,
    Canceled,
    Timeout,
    Contract,
    Other,
}

impl FailureKind {
    /// Finds the first taxonomy error anywhere in the chain.
    pub fn classify(err: &anyhow::Error) -> Self {
        err.chain()
            .find_map(|cause| cause.downcast_ref::<GraphRagError>())
            .map(|e| match e {
                GraphRagError::Extraction { .. } => Self::Extraction,
                GraphRagError::Store(_) => Self::Store,
                GraphRagError::LockTimeout { .. } => Self::LockTimeout,
                GraphRagError::TaskCanceled { .. } => Self::Canceled,
                GraphRagError::Timeout { .. } => Self::Timeout,
                GraphRagError::Contract(_) => Self::Contract,
            })
            .unwrap_or(Self::Other)
    }
}

pub fn is_canceled(err: &anyhow::Error) -> bool {
    FailureKind::classify(err) == FailureKind::Canceled
}
