#![forbid(unsafe_code)]

use skene_core::MediaType;
use thiserror::Error;

pub type SinkResult<T> = Result<T, SinkError>;

#[derive(Debug, Error, Clone)]
pub enum SinkError {
    #[error("append failed: {0}")]
    Append(String),

    #[error("removal failed: {0}")]
    Remove(String),

    #[error("decoder buffer rejected configuration: {0}")]
    Configuration(String),

    #[error("operation aborted")]
    Aborted,

    #[error("buffer queue is shut down")]
    QueueClosed,

    #[error("no decoder buffer backend for type {0}")]
    TypeUnknown(MediaType),

    #[error("decoder buffer creation failed: {0}")]
    CreationFailed(String),
}
