//! Error types for Tally

use thiserror::Error;

use crate::models::PayloadStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid payload transition: {from} -> {to}")]
    InvalidTransition {
        from: PayloadStatus,
        to: PayloadStatus,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
