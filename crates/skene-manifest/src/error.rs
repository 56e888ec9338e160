#![forbid(unsafe_code)]

use thiserror::Error;

pub type ManifestResult<T> = Result<T, ManifestError>;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("timeline parsing error: {0}")]
    TimelineParse(String),

    #[error("invalid media URL template: {0}")]
    InvalidTemplate(String),

    #[error("invalid attribute {attribute}: {value}")]
    InvalidAttribute { attribute: &'static str, value: String },
}
