use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Embedding error: {0}")]
    Embedding(String),
}

pub mod classifier;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod embedder;
pub mod pipeline;
pub mod selector;
pub mod store;
