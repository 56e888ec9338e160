#![forbid(unsafe_code)]

//! Clock-driven adaptive buffering pipelines.
//!
//! For each track type, a [`RepresentationBuffer`] turns "what should be
//! buffered around the playhead" into segment fetches and serialised
//! decoder-buffer appends. A [`PeriodBuffer`] sequences Representation
//! buffers across quality and track switches within one Period, and the
//! [`PeriodOrchestrator`] chains per-Period pipelines into a seamless
//! multi-Period timeline with garbage collection, seek handling and
//! end-of-stream aggregation.

mod abr;
mod clock;
mod gc;
mod options;
mod orchestrator;
mod period;
mod representation;

pub use abr::{LowestBitratePicker, RepresentationPicker};
pub use clock::{PlaybackClock, PlaybackTick};
pub use gc::enforce_memory_bounds;
pub use options::{BufferOptions, SwitchMode};
pub use orchestrator::{ControlMessage, OrchestratorConfig, OrchestratorHandle, PeriodOrchestrator};
pub use period::{PeriodBuffer, PeriodCommand, PeriodEvent};
pub use representation::{RepresentationBuffer, RepresentationContext, RepresentationEvent};
