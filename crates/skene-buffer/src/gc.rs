#![forbid(unsafe_code)]

use skene_core::MediaType;
use skene_sink::SerializedBufferQueue;
use tracing::debug;

use crate::options::BufferOptions;

/// Evict retained data outside `[position − max_behind, position + max_ahead]`.
///
/// Removals join the queue's FIFO behind any pending appends; they are
/// detached so a dropped caller never cancels an eviction. No-ops when
/// the protected window already covers everything retained.
pub fn enforce_memory_bounds(
    queue: &SerializedBufferQueue,
    media_type: MediaType,
    position: f64,
    options: &BufferOptions,
) {
    let buffered = queue.buffered_ranges();
    if buffered.is_empty() {
        return;
    }

    let max_behind = options.effective_max_behind(media_type);
    if max_behind.is_finite() {
        let cutoff = position - max_behind;
        if cutoff > 0.0 && buffered.intersects(0.0, cutoff) {
            debug!(%media_type, position, cutoff, "evicting behind playhead");
            queue.remove_buffer(0.0, cutoff).detach();
        }
    }

    let max_ahead = options.effective_max_ahead(media_type);
    if max_ahead.is_finite() {
        let cutoff = position + max_ahead;
        if buffered.intersects(cutoff, f64::INFINITY) {
            debug!(%media_type, position, cutoff, "evicting ahead of playhead");
            queue.remove_buffer(cutoff, f64::INFINITY).detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use skene_sink::{mock::MockRawBuffer, PushedChunk};
    use tokio::time::sleep;

    use super::*;

    fn chunk(start: f64, end: f64) -> PushedChunk {
        PushedChunk {
            init_data: None,
            data: Some(Bytes::from_static(b"x")),
            codec: "avc1.64001f".into(),
            timestamp_offset: 0.0,
            append_window: (None, None),
            bounds: Some((start, end)),
        }
    }

    #[tokio::test]
    async fn evicts_behind_and_ahead() {
        let mock = MockRawBuffer::new("avc1.64001f");
        let queue =
            SerializedBufferQueue::new(MediaType::Video, Box::new(mock), Duration::from_millis(50));
        queue.push_chunk(chunk(0.0, 120.0)).wait().await.unwrap();

        let options = BufferOptions::default()
            .with_max_buffer_behind(10.0)
            .with_max_buffer_ahead(20.0);
        enforce_memory_bounds(&queue, MediaType::Video, 60.0, &options);

        // Removals are queued behind; give the queue task a moment.
        sleep(Duration::from_millis(20)).await;
        let buffered = queue.buffered_ranges();
        assert!(!buffered.contains_time(40.0));
        assert!(buffered.covers(50.0, 80.0));
        assert!(!buffered.contains_time(90.0));
    }

    #[tokio::test]
    async fn no_removal_when_window_covers_everything() {
        let mock = MockRawBuffer::new("avc1.64001f");
        let queue = SerializedBufferQueue::new(
            MediaType::Video,
            Box::new(mock.clone()),
            Duration::from_millis(50),
        );
        queue.push_chunk(chunk(55.0, 65.0)).wait().await.unwrap();

        let options = BufferOptions::default()
            .with_max_buffer_behind(10.0)
            .with_max_buffer_ahead(10.0);
        enforce_memory_bounds(&queue, MediaType::Video, 60.0, &options);

        sleep(Duration::from_millis(20)).await;
        assert!(!mock
            .ops()
            .iter()
            .any(|op| matches!(op, skene_sink::mock::MockOp::Remove { .. })));
    }
}
