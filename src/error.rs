use thiserror::Error;

/// Document store failures that callers branch on.
///
/// Everything else travels as a plain `anyhow::Error`; these can be
/// recovered with `err.downcast_ref::<StoreError>()`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("{method} {path} failed: {status} - {body}")]
    Http {
        method: &'static str,
        path: String,
        status: u16,
        body: String,
    },

    #[error("malformed document at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl StoreError {
    pub fn is_not_found(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<StoreError>(), Some(StoreError::NotFound(_)))
    }
}
