#![forbid(unsafe_code)]

use std::{collections::HashSet, sync::Arc};

use bytes::Bytes;
use skene_core::{MediaError, MediaErrorCode, MediaType, TimeRanges};
use skene_manifest::{Adaptation, Manifest, Period, Representation, Segment};
use skene_net::{
    ParseError, ParsedChunk, SegmentLoader, SegmentParser, SegmentRequest,
};
use skene_sink::{BufferSlot, InsertedChunk, PushedChunk, SinkError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{clock::PlaybackTick, options::BufferOptions};

/// What one Representation Buffer is buffering.
#[derive(Clone)]
pub struct RepresentationContext {
    pub manifest: Arc<Manifest>,
    pub period: Arc<Period>,
    pub adaptation: Arc<Adaptation>,
    pub representation: Arc<Representation>,
}

/// Events flowing from a Representation Buffer to its Period layer.
#[derive(Clone, Debug)]
pub enum RepresentationEvent {
    /// A segment reached the decoder buffer and the inventory agrees.
    AddedSegment {
        segment: Segment,
        buffered: TimeRanges,
        data: Bytes,
    },
    /// Everything up to the target (or the Period end) is buffered.
    FullBuffer,
    /// The playhead re-entered this buffer's fully-buffered content.
    ActiveBuffer,
    /// The decoder pipeline must be rebuilt.
    NeedsReload { position: f64 },
    Warning(MediaError),
    Fatal(MediaError),
}

/// Clock-driven buffering loop for one Representation.
///
/// Each pass: compute the target window, diff it against the inventory,
/// fetch the earliest missing segment, push it through the serialised
/// queue, record it. Idles on the clock once the window is satisfied.
pub struct RepresentationBuffer {
    content: RepresentationContext,
    slot: BufferSlot,
    loader: Arc<dyn SegmentLoader>,
    parser: Arc<dyn SegmentParser>,
    clock: watch::Receiver<PlaybackTick>,
    options: BufferOptions,
    events: mpsc::UnboundedSender<RepresentationEvent>,
    cancel: CancellationToken,
    media_type: MediaType,

    init_pushed: bool,
    full_announced: bool,
    ever_full: bool,
    was_in_buffered: bool,
    last_wanted: f64,
    /// Segments that failed non-retryably this session; skipped so the
    /// loop cannot spin on them.
    failed_segments: HashSet<String>,
}

enum StepOutcome {
    /// A segment was fetched and pushed; run another pass immediately.
    Progress,
    /// Nothing to do until the clock moves.
    Idle,
    /// The buffer is being torn down.
    Stop,
}

impl RepresentationBuffer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content: RepresentationContext,
        slot: BufferSlot,
        loader: Arc<dyn SegmentLoader>,
        parser: Arc<dyn SegmentParser>,
        clock: watch::Receiver<PlaybackTick>,
        options: BufferOptions,
        events: mpsc::UnboundedSender<RepresentationEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let media_type = content.adaptation.media_type;
        Self {
            content,
            slot,
            loader,
            parser,
            clock,
            options,
            events,
            cancel,
            media_type,
            init_pushed: false,
            full_announced: false,
            ever_full: false,
            was_in_buffered: false,
            last_wanted: f64::NEG_INFINITY,
            failed_segments: HashSet::new(),
        }
    }

    pub async fn run(mut self) {
        debug!(
            media_type = %self.media_type,
            period = %self.content.period.id,
            representation = %self.content.representation.id,
            "representation buffer started"
        );
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.step().await {
                StepOutcome::Progress => continue,
                StepOutcome::Stop => break,
                StepOutcome::Idle => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        changed = self.clock.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!(
            media_type = %self.media_type,
            representation = %self.content.representation.id,
            "representation buffer stopped"
        );
    }

    /// Target window `[wanted, wanted + ahead]`, clipped to the Period.
    fn target_window(&self, tick: &PlaybackTick) -> (f64, f64) {
        let wanted = tick.wanted_position().max(self.content.period.start);
        let mut end = wanted + self.options.wanted_buffer_ahead;
        if let Some(period_end) = self.content.period.end() {
            end = end.min(period_end);
        }
        (wanted, end)
    }

    async fn step(&mut self) -> StepOutcome {
        let tick = *self.clock.borrow();
        let (wanted, target_end) = self.target_window(&tick);

        self.observe_reentry(wanted);

        if !self.init_pushed {
            if let Some(init) = self.content.representation.index.init_segment() {
                return self.fetch_and_push(init).await;
            }
            self.init_pushed = true;
        }

        let index = &self.content.representation.index;
        let candidates = index.segments(wanted, target_end - wanted);
        let next = {
            let inventory = self.slot.inventory.lock();
            candidates.into_iter().find(|seg| {
                seg.end() > wanted
                    && !self.failed_segments.contains(&seg.id)
                    && !inventory.has_segment(
                        &self.content.representation.id,
                        seg.start(),
                        seg.end(),
                    )
            })
        };

        match next {
            Some(segment) => {
                self.full_announced = false;
                self.fetch_and_push(segment).await
            }
            None => {
                if index.should_refresh(wanted, target_end) {
                    // A dynamic index may simply not list the window yet.
                    trace!(media_type = %self.media_type, "index exhausted, waiting for refresh");
                    return StepOutcome::Idle;
                }
                if !self.full_announced {
                    self.full_announced = true;
                    self.ever_full = true;
                    debug!(
                        media_type = %self.media_type,
                        period = %self.content.period.id,
                        target_end,
                        "buffer full up to target"
                    );
                    let _ = self.events.send(RepresentationEvent::FullBuffer);
                }
                StepOutcome::Idle
            }
        }
    }

    /// Emit `ActiveBuffer` when the playhead comes back into content this
    /// buffer had already completed: either it was outside any buffered
    /// range, or it jumped backwards between buffered ranges.
    fn observe_reentry(&mut self, wanted: f64) {
        let in_buffered = self.slot.queue.buffered_ranges().contains_time(wanted)
            && self.content.period.contains(wanted);
        let jumped_back = wanted + skene_core::RANGE_EPSILON < self.last_wanted;
        if in_buffered && self.ever_full && (!self.was_in_buffered || jumped_back) {
            let _ = self.events.send(RepresentationEvent::ActiveBuffer);
        }
        self.was_in_buffered = in_buffered;
        self.last_wanted = wanted;
    }

    async fn fetch_and_push(&mut self, segment: Segment) -> StepOutcome {
        let request = SegmentRequest {
            representation: Arc::clone(&self.content.representation),
            segment: segment.clone(),
        };

        let loaded = tokio::select! {
            _ = self.cancel.cancelled() => return StepOutcome::Stop,
            loaded = self.loader.load(&request) => loaded,
        };
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(error) => return self.on_load_error(&segment, error),
        };

        let chunks = match self.parser.parse(&request, loaded.data, false) {
            Ok(chunks) => chunks,
            Err(ParseError::RequiresReload(reason)) => {
                let tick = *self.clock.borrow();
                warn!(media_type = %self.media_type, %reason, "transport requested a reload");
                let _ = self.events.send(RepresentationEvent::NeedsReload {
                    position: tick.wanted_position(),
                });
                return StepOutcome::Stop;
            }
            Err(error) => {
                warn!(media_type = %self.media_type, segment = %segment.id, %error, "unparsable segment");
                self.failed_segments.insert(segment.id.clone());
                let _ = self.events.send(RepresentationEvent::Warning(MediaError::warning(
                    MediaErrorCode::BufferAppendError,
                    error.to_string(),
                )));
                return StepOutcome::Progress;
            }
        };

        for chunk in chunks {
            if let StepOutcome::Stop = self.push_chunk(&segment, chunk).await {
                return StepOutcome::Stop;
            }
        }
        StepOutcome::Progress
    }

    fn on_load_error(&mut self, segment: &Segment, error: skene_net::NetError) -> StepOutcome {
        let index = &self.content.representation.index;
        if index.can_be_out_of_sync_error(error.http_status()) {
            // The server no longer has what the index predicted; the
            // manifest owner will refresh it.
            warn!(
                media_type = %self.media_type,
                segment = %segment.id,
                "segment gone from server, index likely out of sync"
            );
            return StepOutcome::Idle;
        }
        warn!(
            media_type = %self.media_type,
            segment = %segment.id,
            %error,
            "segment load failed beyond retries"
        );
        self.failed_segments.insert(segment.id.clone());
        let _ = self.events.send(RepresentationEvent::Warning(MediaError::warning(
            MediaErrorCode::BufferAppendError,
            format!("segment {} unavailable: {error}", segment.id),
        )));
        StepOutcome::Progress
    }

    async fn push_chunk(&mut self, segment: &Segment, chunk: ParsedChunk) -> StepOutcome {
        let period = &self.content.period;
        // Widen slightly so segments touching the Period edges are not
        // clipped to zero-width slivers.
        let window_start = (period.start - self.options.append_window_security_start).max(0.0);
        let window_end = period
            .end()
            .map(|end| end + self.options.append_window_security_end);

        let (pushed, requested, data) = match chunk {
            ParsedChunk::Init { data, .. } => (
                PushedChunk {
                    init_data: Some(data.clone()),
                    data: None,
                    codec: self.content.representation.codec.clone(),
                    timestamp_offset: 0.0,
                    append_window: (Some(window_start), window_end),
                    bounds: None,
                },
                None,
                data,
            ),
            ParsedChunk::Media {
                data,
                infos,
                offset,
                append_window,
            } => {
                let (start, end) = match &infos {
                    Some(infos) => (
                        infos.start_secs() + offset,
                        infos.end_secs().unwrap_or(segment.end()) + offset,
                    ),
                    None => (segment.start(), segment.end()),
                };
                let window = (
                    Some(append_window.0.unwrap_or(window_start)),
                    append_window.1.map(Some).unwrap_or(window_end),
                );
                (
                    PushedChunk {
                        init_data: None,
                        data: Some(data.clone()),
                        codec: self.content.representation.codec.clone(),
                        timestamp_offset: offset,
                        append_window: window,
                        bounds: Some((start, end)),
                    },
                    Some((start, end)),
                    data,
                )
            }
        };

        let buffered = match self.slot.queue.push_chunk(pushed).wait().await {
            Ok(buffered) => buffered,
            Err(SinkError::Aborted | SinkError::QueueClosed) => return StepOutcome::Stop,
            Err(error) => {
                let _ = self.events.send(RepresentationEvent::Fatal(MediaError::fatal(
                    MediaErrorCode::BufferAppendError,
                    error.to_string(),
                )));
                return StepOutcome::Stop;
            }
        };

        if segment.is_init {
            self.init_pushed = true;
            trace!(media_type = %self.media_type, "init segment configured");
            return StepOutcome::Progress;
        }

        if let Some((start, end)) = requested {
            let mut inventory = self.slot.inventory.lock();
            inventory.insert_chunk(InsertedChunk {
                period_id: period.id.clone(),
                representation_id: self.content.representation.id.clone(),
                segment: segment.clone(),
                start,
                end,
            });
            inventory.synchronize_buffered(&buffered);
        }

        let _ = self.events.send(RepresentationEvent::AddedSegment {
            segment: segment.clone(),
            buffered,
            data,
        });
        StepOutcome::Progress
    }
}
