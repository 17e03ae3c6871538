//! Store failures. Outside of startup these are logged and never retried.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(String),

    #[error("cannot prepare database directory {path}: {reason}")]
    Path { path: PathBuf, reason: String },

    #[error("schema setup failed ({stage}): {reason}")]
    Schema { stage: &'static str, reason: String },
}

impl StoreError {
    pub(crate) fn schema(stage: &'static str, err: rusqlite::Error) -> Self {
        Self::Schema {
            stage,
            reason: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
