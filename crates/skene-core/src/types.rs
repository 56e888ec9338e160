#![forbid(unsafe_code)]

use std::fmt;

/// Track type of a decoder buffer and of everything feeding it.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum MediaType {
    Audio,
    Video,
    Text,
    Image,
}

impl MediaType {
    /// All track types, in buffer-creation order.
    pub const ALL: [MediaType; 4] = [
        MediaType::Audio,
        MediaType::Video,
        MediaType::Text,
        MediaType::Image,
    ];

    /// Whether this type maps to a platform-native decoder buffer.
    ///
    /// Native buffers (audio/video) are reused across codec changes;
    /// custom buffers (text/image) are torn down and re-created.
    #[must_use]
    pub fn is_native(self) -> bool {
        matches!(self, MediaType::Audio | MediaType::Video)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
            MediaType::Text => "text",
            MediaType::Image => "image",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
