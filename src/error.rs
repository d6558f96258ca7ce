use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error in {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Usage: {0}")]
    Usage(String),

    #[error("Catalog parse error: {0}")]
    Catalog(#[from] serde_json::Error),

    #[error("Unknown grouping level: {0}")]
    UnknownLevel(String),

    #[error("Track transfer was cancelled")]
    TransferCancelled,
}

pub type Result<T> = std::result::Result<T, BrowserError>;
