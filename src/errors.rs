// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("digest error: {0}")]
    Digest(#[from] serde_json::Error),

    #[error("analysis graph invariant violated: {0}")]
    Analysis(String),

    #[error("cache operation '{op}' failed: {msg}")]
    Cache { op: String, msg: String },

    #[error("engine stopped: {0}")]
    Stopped(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
