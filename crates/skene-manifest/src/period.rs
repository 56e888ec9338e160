#![forbid(unsafe_code)]

use std::{collections::BTreeMap, sync::Arc};

use skene_core::MediaType;

use crate::Adaptation;

/// A contiguous time span of the presentation sharing one track set.
#[derive(Clone, Debug)]
pub struct Period {
    pub id: String,
    /// Presentation start in seconds.
    pub start: f64,
    /// `None` for the still-growing last Period of a live presentation.
    pub duration: Option<f64>,
    pub adaptations: BTreeMap<MediaType, Vec<Arc<Adaptation>>>,
    /// `false` while the Period is an unresolved external reference
    /// (xlink); its adaptations are empty until loaded.
    pub is_loaded: bool,
}

impl Period {
    /// Presentation end in seconds, `None` when the duration is unknown.
    #[must_use]
    pub fn end(&self) -> Option<f64> {
        self.duration.map(|d| self.start + d)
    }

    /// Whether `time` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && self.end().is_none_or(|end| time < end)
    }

    #[must_use]
    pub fn adaptations_for(&self, media_type: MediaType) -> &[Arc<Adaptation>] {
        self.adaptations
            .get(&media_type)
            .map_or(&[], Vec::as_slice)
    }

    /// Track types this Period carries at least one Adaptation for.
    pub fn available_types(&self) -> impl Iterator<Item = MediaType> + '_ {
        self.adaptations
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(t, _)| *t)
    }
}
