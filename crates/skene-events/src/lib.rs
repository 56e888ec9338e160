#![forbid(unsafe_code)]

//! Unified event surface for the skene buffering core.
//!
//! Hierarchical: per-buffer progress lives in [`BufferEvent`], timeline
//! orchestration in [`StreamEvent`], both wrapped by [`Event`] on a shared
//! [`EventBus`].

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{BufferEvent, Event, StreamEvent};
