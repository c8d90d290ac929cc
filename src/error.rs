use std::path::PathBuf;

use crate::upload::UploadError;

#[derive(thiserror::Error, Debug)]
pub(crate) enum PortalError {
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("publisher not found: {0}")]
    PublisherNotFound(String),

    #[error("vocabulary not found: {0}")]
    VocabularyNotFound(String),

    #[error("invalid {kind} capacity '{value}' for member '{member}'")]
    InvalidCapacity {
        kind: &'static str,
        member: String,
        value: String,
    },

    #[error("{file} has no \"{column}\" column")]
    MissingColumn { file: String, column: &'static str },

    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: String },

    #[error(transparent)]
    Upload(#[from] UploadError),
}

pub(crate) type PortalResult<T> = Result<T, PortalError>;
