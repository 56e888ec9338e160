#![forbid(unsafe_code)]

use std::sync::Arc;

use skene_core::MediaType;

use crate::Representation;

/// A set of interchangeable Representations of one track type.
#[derive(Clone, Debug)]
pub struct Adaptation {
    pub id: String,
    pub media_type: MediaType,
    pub representations: Vec<Arc<Representation>>,
}

impl Adaptation {
    #[must_use]
    pub fn representation(&self, id: &str) -> Option<&Arc<Representation>> {
        self.representations.iter().find(|r| r.id == id)
    }

    /// Lowest-bitrate Representation, the conservative starting choice.
    #[must_use]
    pub fn lowest_bitrate(&self) -> Option<&Arc<Representation>> {
        self.representations.iter().min_by_key(|r| r.bitrate)
    }
}
