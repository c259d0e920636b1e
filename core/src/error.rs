use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("invalid workspace id {0:?}")]
    InvalidWorkspace(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("term index space exhausted for workspace {0}")]
    TermIndexExhausted(String),
    #[error("dense store error: {0}")]
    DenseStore(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;

pub(crate) fn validate_workspace(workspace_id: &str) -> Result<()> {
    if workspace_id.is_empty() || workspace_id.contains('\0') {
        return Err(IndexError::InvalidWorkspace(workspace_id.to_string()));
    }
    Ok(())
}
