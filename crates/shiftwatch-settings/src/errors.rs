use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A count or interval that must be non-zero was zero.
    #[error("{key} must be greater than zero")]
    NotPositive { key: &'static str },
}

pub type Result<T> = std::result::Result<T, SettingsError>;
