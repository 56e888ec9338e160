#![forbid(unsafe_code)]

use thiserror::Error;

use crate::MediaType;

/// Stable error codes surfaced to the API layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaErrorCode {
    BufferAppendError,
    BufferFullError,
    BufferTypeUnknown,
    ManifestParseError,
    MediaTimeBeforeManifest,
    MediaTimeAfterManifest,
    NoPlayableRepresentation,
}

impl MediaErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BufferAppendError => "BUFFER_APPEND_ERROR",
            Self::BufferFullError => "BUFFER_FULL_ERROR",
            Self::BufferTypeUnknown => "BUFFER_TYPE_UNKNOWN",
            Self::ManifestParseError => "MANIFEST_PARSE_ERROR",
            Self::MediaTimeBeforeManifest => "MEDIA_TIME_BEFORE_MANIFEST",
            Self::MediaTimeAfterManifest => "MEDIA_TIME_AFTER_MANIFEST",
            Self::NoPlayableRepresentation => "NO_PLAYABLE_REPRESENTATION",
        }
    }
}

/// A playback-affecting error or warning.
///
/// `fatal` distinguishes errors that abort playback from recoverable
/// warnings that only surface to the API.
#[derive(Clone, Debug, Error)]
#[error("{} ({}): {message}", code.as_str(), if *fatal { "fatal" } else { "warning" })]
pub struct MediaError {
    pub code: MediaErrorCode,
    pub message: String,
    pub fatal: bool,
}

impl MediaError {
    #[must_use]
    pub fn fatal(code: MediaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: true,
        }
    }

    #[must_use]
    pub fn warning(code: MediaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: false,
        }
    }

    /// Warning for a wanted position before the manifest's minimum position.
    #[must_use]
    pub fn before_manifest(position: f64, minimum: f64) -> Self {
        Self::warning(
            MediaErrorCode::MediaTimeBeforeManifest,
            format!("wanted position {position:.3}s is before the manifest minimum {minimum:.3}s"),
        )
    }

    /// Warning for a wanted position past the manifest's maximum position.
    #[must_use]
    pub fn after_manifest(position: f64, maximum: f64) -> Self {
        Self::warning(
            MediaErrorCode::MediaTimeAfterManifest,
            format!("wanted position {position:.3}s is past the manifest maximum {maximum:.3}s"),
        )
    }

    /// Fatal error for a buffer type no backend recognises.
    #[must_use]
    pub fn unknown_buffer_type(media_type: MediaType) -> Self {
        Self::fatal(
            MediaErrorCode::BufferTypeUnknown,
            format!("no decoder buffer backend for type {media_type}"),
        )
    }
}
