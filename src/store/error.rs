use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{kind} {id} already exists")]
    Duplicate { kind: &'static str, id: String },
}
