use thiserror::Error;

pub type Result<T> = std::result::Result<T, AkasError>;

#[derive(Error, Debug)]
pub enum AkasError {
    #[error("Input error: {0}")]
    Input(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod providers;
pub mod server;
pub mod synth;

#[cfg(test)]
pub mod testing;
