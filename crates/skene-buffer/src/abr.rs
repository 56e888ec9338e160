#![forbid(unsafe_code)]

use std::sync::Arc;

use skene_manifest::{Adaptation, Representation};

/// Seam towards the adaptive-bitrate collaborator: picks the
/// Representation a fresh pipeline starts with. Mid-stream switches
/// arrive as explicit commands instead.
pub trait RepresentationPicker: Send + Sync {
    fn pick(&self, adaptation: &Adaptation) -> Option<Arc<Representation>>;
}

/// Conservative default: start on the lowest bitrate.
#[derive(Clone, Copy, Debug, Default)]
pub struct LowestBitratePicker;

impl RepresentationPicker for LowestBitratePicker {
    fn pick(&self, adaptation: &Adaptation) -> Option<Arc<Representation>> {
        adaptation.lowest_bitrate().cloned()
    }
}
