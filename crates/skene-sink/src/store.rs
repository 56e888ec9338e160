#![forbid(unsafe_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use skene_core::MediaType;
use tracing::{debug, info};

use crate::{
    error::{SinkError, SinkResult},
    inventory::SegmentInventory,
    queue::SerializedBufferQueue,
    raw::RawMediaBuffer,
};

/// Creates the platform decoder buffer backing one track type.
///
/// The engine owns one factory per media source; passing it in explicitly
/// replaces any notion of process-global buffer registries.
pub trait RawBufferFactory: Send + Sync {
    fn create(&self, media_type: MediaType, codec: &str) -> SinkResult<Box<dyn RawMediaBuffer>>;
}

/// One track type's queue and its paired inventory.
///
/// The inventory survives Representation changes; it is only reset when
/// the slot is disposed.
#[derive(Clone)]
pub struct BufferSlot {
    pub queue: Arc<SerializedBufferQueue>,
    pub inventory: Arc<Mutex<SegmentInventory>>,
}

/// Hands out at most one [`SerializedBufferQueue`] per track type.
///
/// Native types (audio/video) reuse their queue across codec changes via
/// an in-place switch; custom types (text/image) abort and re-create.
pub struct BufferStore {
    factory: Arc<dyn RawBufferFactory>,
    flush_interval: Duration,
    slots: HashMap<MediaType, (BufferSlot, String)>,
}

impl BufferStore {
    #[must_use]
    pub fn new(factory: Arc<dyn RawBufferFactory>, flush_interval: Duration) -> Self {
        Self {
            factory,
            flush_interval,
            slots: HashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, media_type: MediaType) -> Option<BufferSlot> {
        self.slots.get(&media_type).map(|(slot, _)| slot.clone())
    }

    #[must_use]
    pub fn has(&self, media_type: MediaType) -> bool {
        self.slots.contains_key(&media_type)
    }

    /// Get the slot for `media_type`, creating it with `codec` when
    /// absent.
    pub fn get_or_create(&mut self, media_type: MediaType, codec: &str) -> SinkResult<BufferSlot> {
        if let Some((slot, current_codec)) = self.slots.get_mut(&media_type) {
            if current_codec != codec {
                if media_type.is_native() {
                    debug!(%media_type, from = %current_codec, to = %codec, "codec change on existing buffer");
                    slot.queue.switch_codec(codec).detach();
                    *current_codec = codec.to_string();
                    return Ok(slot.clone());
                }
                // Custom types cannot switch in place; fall through to
                // re-creation.
            } else {
                return Ok(slot.clone());
            }
        }

        if let Some((slot, _)) = self.slots.remove(&media_type) {
            info!(%media_type, "re-creating custom buffer for new codec");
            slot.queue.abort();
            slot.queue.dispose();
            slot.inventory.lock().reset();
        }

        let buffer = self.factory.create(media_type, codec)?;
        let queue = Arc::new(SerializedBufferQueue::new(
            media_type,
            buffer,
            self.flush_interval,
        ));
        let slot = BufferSlot {
            queue,
            inventory: Arc::new(Mutex::new(SegmentInventory::new())),
        };
        self.slots
            .insert(media_type, (slot.clone(), codec.to_string()));
        info!(%media_type, %codec, "decoder buffer created");
        Ok(slot)
    }

    /// Dispose one type's queue; its inventory is reset.
    pub fn dispose(&mut self, media_type: MediaType) {
        if let Some((slot, _)) = self.slots.remove(&media_type) {
            slot.queue.dispose();
            slot.inventory.lock().reset();
            debug!(%media_type, "decoder buffer disposed");
        }
    }

    pub fn dispose_all(&mut self) {
        let types: Vec<_> = self.slots.keys().copied().collect();
        for media_type in types {
            self.dispose(media_type);
        }
    }
}

impl Drop for BufferStore {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// Factory producing [`crate::ManualMediaBuffer`]s for every type; enough
/// for text/image pipelines and for tests.
#[derive(Debug, Default)]
pub struct ManualBufferFactory;

impl RawBufferFactory for ManualBufferFactory {
    fn create(&self, _media_type: MediaType, codec: &str) -> SinkResult<Box<dyn RawMediaBuffer>> {
        Ok(Box::new(crate::ManualMediaBuffer::new(codec)))
    }
}

/// Factory refusing every type, for error-path tests.
#[derive(Debug, Default)]
pub struct NoBufferFactory;

impl RawBufferFactory for NoBufferFactory {
    fn create(&self, media_type: MediaType, _codec: &str) -> SinkResult<Box<dyn RawMediaBuffer>> {
        Err(SinkError::TypeUnknown(media_type))
    }
}
