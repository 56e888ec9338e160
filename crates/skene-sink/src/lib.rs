#![forbid(unsafe_code)]

//! Serialised access to decoder buffers.
//!
//! A decoder buffer ([`RawMediaBuffer`]) tolerates at most one in-flight
//! mutation; [`SerializedBufferQueue`] funnels every append and removal
//! through a FIFO owned by a dedicated task, reconciling codec,
//! timestamp-offset and append-window configuration before each step.
//! [`SegmentInventory`] reconciles what was pushed with what the decoder
//! actually retained; [`BufferStore`] hands out at most one queue per
//! track type.

mod error;
mod inventory;
pub mod mock;
mod queue;
mod raw;
mod store;

pub use error::{SinkError, SinkResult};
pub use inventory::{InsertedChunk, InventoryEntry, SegmentInventory};
pub use queue::{OperationHandle, PushedChunk, SerializedBufferQueue};
pub use raw::{ManualMediaBuffer, RawBufferEvent, RawMediaBuffer};
pub use store::{BufferSlot, BufferStore, ManualBufferFactory, NoBufferFactory, RawBufferFactory};
