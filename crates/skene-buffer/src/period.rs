#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;
use skene_core::{MediaError, MediaType, TimeRanges};
use skene_manifest::{Adaptation, Manifest, Period, Representation, Segment};
use skene_net::{SegmentLoader, SegmentParser};
use skene_sink::BufferSlot;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    abr::RepresentationPicker,
    clock::PlaybackTick,
    options::{BufferOptions, SwitchMode},
    representation::{RepresentationBuffer, RepresentationContext, RepresentationEvent},
};

/// External control of one Period's pipeline.
#[derive(Clone, Debug)]
pub enum PeriodCommand {
    /// The ABR collaborator picked another Representation.
    SelectRepresentation(Arc<Representation>),
    /// The user switched tracks.
    SelectAdaptation(Arc<Adaptation>),
    /// These Representations lost their keys; flush their retained
    /// ranges and rebuild from the current position.
    DecipherabilityFlush(Vec<String>),
}

/// Events flowing from a Period Buffer to the orchestrator.
#[derive(Clone, Debug)]
pub enum PeriodEvent {
    AddedSegment {
        representation_id: String,
        segment: Segment,
        buffered: TimeRanges,
        data: Bytes,
    },
    FullBuffer,
    ActiveBuffer,
    NeedsReload { position: f64 },
    FlushedUndecipherable { position: f64 },
    Warning(MediaError),
    Fatal(MediaError),
}

/// Sequences Representation Buffers for one track type inside one Period.
///
/// Owns at most one running Representation Buffer at a time and rebuilds
/// it on quality switches, track switches and decipherability flushes.
pub struct PeriodBuffer {
    media_type: MediaType,
    manifest: Arc<Manifest>,
    period: Arc<Period>,
    slot: BufferSlot,
    loader: Arc<dyn SegmentLoader>,
    parser: Arc<dyn SegmentParser>,
    picker: Arc<dyn RepresentationPicker>,
    clock: watch::Receiver<PlaybackTick>,
    options: BufferOptions,
    commands: mpsc::UnboundedReceiver<PeriodCommand>,
    events: mpsc::UnboundedSender<PeriodEvent>,
    cancel: CancellationToken,

    adaptation: Option<Arc<Adaptation>>,
    representation: Option<Arc<Representation>>,
    child_cancel: Option<CancellationToken>,
    child_events: Option<mpsc::UnboundedReceiver<RepresentationEvent>>,
}

impl PeriodBuffer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        media_type: MediaType,
        manifest: Arc<Manifest>,
        period: Arc<Period>,
        slot: BufferSlot,
        loader: Arc<dyn SegmentLoader>,
        parser: Arc<dyn SegmentParser>,
        picker: Arc<dyn RepresentationPicker>,
        clock: watch::Receiver<PlaybackTick>,
        options: BufferOptions,
        commands: mpsc::UnboundedReceiver<PeriodCommand>,
        events: mpsc::UnboundedSender<PeriodEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            media_type,
            manifest,
            period,
            slot,
            loader,
            parser,
            picker,
            clock,
            options,
            commands,
            events,
            cancel,
            adaptation: None,
            representation: None,
            child_cancel: None,
            child_events: None,
        }
    }

    pub async fn run(mut self) {
        let initial = self
            .period
            .adaptations_for(self.media_type)
            .first()
            .cloned();
        let Some(adaptation) = initial else {
            // Nothing of this type in this Period: it is trivially full.
            debug!(
                media_type = %self.media_type,
                period = %self.period.id,
                "no adaptation of this type, reporting full"
            );
            let _ = self.events.send(PeriodEvent::FullBuffer);
            self.cancel.cancelled().await;
            return;
        };
        self.start_representation_for(adaptation);

        enum Arm {
            Stop,
            Command(Option<PeriodCommand>),
            Child(Option<RepresentationEvent>),
        }

        loop {
            let arm = {
                let child_events = &mut self.child_events;
                let commands = &mut self.commands;
                let cancel = &self.cancel;
                tokio::select! {
                    _ = cancel.cancelled() => Arm::Stop,
                    command = commands.recv() => Arm::Command(command),
                    // A torn-down child leaves no channel behind; model
                    // the absence as a pending-forever arm.
                    event = async {
                        match child_events.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending::<Option<RepresentationEvent>>().await,
                        }
                    } => Arm::Child(event),
                }
            };
            match arm {
                Arm::Stop | Arm::Command(None) => break,
                Arm::Command(Some(command)) => self.handle_command(command).await,
                Arm::Child(Some(event)) => self.forward(event),
                Arm::Child(None) => self.child_events = None,
            }
        }
        self.stop_child();
    }

    fn start_representation_for(&mut self, adaptation: Arc<Adaptation>) {
        let Some(representation) = self.picker.pick(&adaptation) else {
            warn!(
                media_type = %self.media_type,
                adaptation = %adaptation.id,
                "adaptation has no playable representation"
            );
            let _ = self.events.send(PeriodEvent::Fatal(MediaError::fatal(
                skene_core::MediaErrorCode::NoPlayableRepresentation,
                format!("adaptation {} has no representation", adaptation.id),
            )));
            return;
        };
        self.adaptation = Some(adaptation);
        self.start_representation(representation);
    }

    fn start_representation(&mut self, representation: Arc<Representation>) {
        self.stop_child();

        let Some(adaptation) = self.adaptation.clone() else {
            warn!(
                media_type = %self.media_type,
                "representation selected before any adaptation"
            );
            return;
        };
        info!(
            media_type = %self.media_type,
            period = %self.period.id,
            representation = %representation.id,
            bitrate = representation.bitrate,
            "starting representation buffer"
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let child_cancel = self.cancel.child_token();
        let buffer = RepresentationBuffer::new(
            RepresentationContext {
                manifest: Arc::clone(&self.manifest),
                period: Arc::clone(&self.period),
                adaptation,
                representation: Arc::clone(&representation),
            },
            self.slot.clone(),
            Arc::clone(&self.loader),
            Arc::clone(&self.parser),
            self.clock.clone(),
            self.options.clone(),
            tx,
            child_cancel.clone(),
        );
        tokio::spawn(buffer.run());

        self.representation = Some(representation);
        self.child_cancel = Some(child_cancel);
        self.child_events = Some(rx);
    }

    fn stop_child(&mut self) {
        if let Some(cancel) = self.child_cancel.take() {
            cancel.cancel();
        }
        self.child_events = None;
    }

    async fn handle_command(&mut self, command: PeriodCommand) {
        match command {
            PeriodCommand::SelectRepresentation(representation) => {
                if self
                    .representation
                    .as_ref()
                    .is_some_and(|current| current.id == representation.id)
                {
                    return;
                }
                match self.options.manual_switch_mode {
                    SwitchMode::Seamless => {
                        // The next unfetched segment simply uses the new
                        // Representation; retained content stays.
                        self.start_representation(representation);
                    }
                    SwitchMode::Direct => {
                        let old_id = self.representation.as_ref().map(|r| r.id.clone());
                        self.stop_child();
                        if let Some(old_id) = old_id {
                            self.flush_representations(&[old_id]).await;
                        }
                        self.start_representation(representation);
                    }
                }
            }
            PeriodCommand::SelectAdaptation(adaptation) => {
                if self
                    .adaptation
                    .as_ref()
                    .is_some_and(|current| current.id == adaptation.id)
                {
                    return;
                }
                info!(
                    media_type = %self.media_type,
                    adaptation = %adaptation.id,
                    "track switch"
                );
                self.stop_child();
                self.start_representation_for(adaptation);
            }
            PeriodCommand::DecipherabilityFlush(representation_ids) => {
                self.stop_child();
                self.flush_representations(&representation_ids).await;
                let position = self.clock.borrow().wanted_position();
                let _ = self
                    .events
                    .send(PeriodEvent::FlushedUndecipherable { position });
                if let Some(adaptation) = self.adaptation.clone() {
                    self.start_representation_for(adaptation);
                }
            }
        }
    }

    /// Remove the retained ranges of the given Representations inside
    /// this Period's window, waiting for the removals to land.
    async fn flush_representations(&mut self, representation_ids: &[String]) {
        let period_start = self.period.start;
        let period_end = self.period.end().unwrap_or(f64::INFINITY);
        let ranges = self.slot.inventory.lock().buffered_ranges_where(|entry| {
            representation_ids
                .iter()
                .any(|id| id == &entry.representation_id)
                && entry.start < period_end
                && entry.end > period_start
        });
        for (start, end) in ranges {
            let start = start.max(period_start);
            let end = end.min(period_end);
            debug!(
                media_type = %self.media_type,
                start,
                end,
                "flushing stale representation range"
            );
            if let Err(error) = self.slot.queue.remove_buffer(start, end).wait().await {
                warn!(media_type = %self.media_type, %error, "flush removal failed");
            }
        }
        let buffered = self.slot.queue.buffered_ranges();
        self.slot.inventory.lock().synchronize_buffered(&buffered);
    }

    fn forward(&mut self, event: RepresentationEvent) {
        let representation_id = self
            .representation
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_default();
        let mapped = match event {
            RepresentationEvent::AddedSegment {
                segment,
                buffered,
                data,
            } => PeriodEvent::AddedSegment {
                representation_id,
                segment,
                buffered,
                data,
            },
            RepresentationEvent::FullBuffer => PeriodEvent::FullBuffer,
            RepresentationEvent::ActiveBuffer => PeriodEvent::ActiveBuffer,
            RepresentationEvent::NeedsReload { position } => PeriodEvent::NeedsReload { position },
            RepresentationEvent::Warning(warning) => PeriodEvent::Warning(warning),
            RepresentationEvent::Fatal(error) => PeriodEvent::Fatal(error),
        };
        let _ = self.events.send(mapped);
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, collections::HashSet, time::Duration};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use skene_manifest::TimelineIndex;
    use skene_net::{
        IdentityParser, LoadedSegment, NetResult, SegmentRequest,
    };
    use skene_sink::{mock::MockRawBuffer, SegmentInventory, SerializedBufferQueue};
    use url::Url;

    use super::*;
    use crate::abr::LowestBitratePicker;
    use crate::clock::PlaybackClock;

    struct EchoLoader;

    #[async_trait]
    impl SegmentLoader for EchoLoader {
        async fn load(&self, request: &SegmentRequest) -> NetResult<LoadedSegment> {
            Ok(LoadedSegment {
                data: Bytes::from(request.segment.id.clone().into_bytes()),
                size: None,
                duration: Some(Duration::from_millis(1)),
            })
        }
    }

    fn representation(id: &str, bitrate: u32) -> Arc<Representation> {
        let index = TimelineIndex::builder(id, 1)
            .media_template(format!("http://cdn.example/{id}/$Time$.m4s"))
            .init_url(Url::parse(&format!("http://cdn.example/{id}/init.mp4")).unwrap())
            .entries(vec![skene_manifest::timeline::TimelineEntry {
                start: 0,
                duration: 4,
                repeat_count: 14,
                first_number: 1,
            }])
            .build();
        Arc::new(Representation {
            id: id.into(),
            bitrate,
            codec: "avc1.64001f".into(),
            mime_type: "video/mp4".into(),
            index: Arc::new(index),
        })
    }

    struct Harness {
        clock: PlaybackClock,
        commands: mpsc::UnboundedSender<PeriodCommand>,
        events: mpsc::UnboundedReceiver<PeriodEvent>,
        cancel: CancellationToken,
        mock: MockRawBuffer,
        slot: BufferSlot,
        reprs: Vec<Arc<Representation>>,
    }

    fn start(switch_mode: SwitchMode) -> Harness {
        let low = representation("v-low", 500_000);
        let high = representation("v-high", 3_000_000);
        let adaptation = Arc::new(Adaptation {
            id: "video-main".into(),
            media_type: MediaType::Video,
            representations: vec![Arc::clone(&low), Arc::clone(&high)],
        });
        let period = Arc::new(Period {
            id: "p1".into(),
            start: 0.0,
            duration: Some(60.0),
            adaptations: BTreeMap::from([(MediaType::Video, vec![Arc::clone(&adaptation)])]),
            is_loaded: true,
        });
        let manifest = Arc::new(Manifest::new(vec![Arc::clone(&period)], false, 0.0, 60.0));

        let mock = MockRawBuffer::new("avc1.64001f");
        let queue = Arc::new(SerializedBufferQueue::new(
            MediaType::Video,
            Box::new(mock.clone()),
            Duration::from_millis(50),
        ));
        let slot = BufferSlot {
            queue,
            inventory: Arc::new(Mutex::new(SegmentInventory::new())),
        };

        let clock = PlaybackClock::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let buffer = PeriodBuffer::new(
            MediaType::Video,
            manifest,
            period,
            slot.clone(),
            Arc::new(EchoLoader),
            Arc::new(IdentityParser),
            Arc::new(LowestBitratePicker),
            clock.observe(),
            BufferOptions::default()
                .with_wanted_buffer_ahead(8.0)
                .with_switch_mode(switch_mode),
            cmd_rx,
            event_tx,
            cancel.clone(),
        );
        tokio::spawn(buffer.run());

        Harness {
            clock,
            commands: cmd_tx,
            events: event_rx,
            cancel,
            mock,
            slot,
            reprs: vec![low, high],
        }
    }

    async fn wait_for_full(harness: &mut Harness) -> Vec<PeriodEvent> {
        let mut seen = Vec::new();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), harness.events.recv())
                .await
                .expect("period buffer stalled")
                .expect("period buffer closed");
            let full = matches!(event, PeriodEvent::FullBuffer);
            seen.push(event);
            if full {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn picker_starts_lowest_bitrate() {
        let mut harness = start(SwitchMode::Seamless);
        harness.clock.set_position(0.0);
        let events = wait_for_full(&mut harness).await;
        assert!(events.iter().all(|e| match e {
            PeriodEvent::AddedSegment {
                representation_id, ..
            } => representation_id == "v-low",
            _ => true,
        }));
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn seamless_switch_keeps_old_content() {
        let mut harness = start(SwitchMode::Seamless);
        harness.clock.set_position(0.0);
        wait_for_full(&mut harness).await;

        let high = harness.reprs[1].clone();
        harness
            .commands
            .send(PeriodCommand::SelectRepresentation(high))
            .unwrap();
        harness.clock.set_position(10.0);
        wait_for_full(&mut harness).await;

        let inventory = harness.slot.inventory.lock();
        let reprs: HashSet<_> = inventory
            .entries()
            .iter()
            .map(|e| e.representation_id.clone())
            .collect();
        assert!(reprs.contains("v-low"));
        assert!(reprs.contains("v-high"));
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn direct_switch_flushes_old_ranges() {
        let mut harness = start(SwitchMode::Direct);
        harness.clock.set_position(0.0);
        wait_for_full(&mut harness).await;

        let high = harness.reprs[1].clone();
        harness
            .commands
            .send(PeriodCommand::SelectRepresentation(high))
            .unwrap();
        harness.clock.set_position(0.1);
        wait_for_full(&mut harness).await;

        let inventory = harness.slot.inventory.lock();
        assert!(inventory
            .entries()
            .iter()
            .all(|e| e.representation_id == "v-high"));
        drop(inventory);
        // The decoder saw removals for the flushed ranges.
        assert!(harness
            .mock
            .ops()
            .iter()
            .any(|op| matches!(op, skene_sink::mock::MockOp::Remove { .. })));
        harness.cancel.cancel();
    }

    #[tokio::test]
    async fn decipherability_flush_rebuilds_buffer() {
        let mut harness = start(SwitchMode::Seamless);
        harness.clock.set_position(0.0);
        wait_for_full(&mut harness).await;

        harness
            .commands
            .send(PeriodCommand::DecipherabilityFlush(vec!["v-low".into()]))
            .unwrap();

        let mut flushed = false;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), harness.events.recv())
                .await
                .expect("period buffer stalled")
                .expect("period buffer closed");
            match event {
                PeriodEvent::FlushedUndecipherable { .. } => flushed = true,
                PeriodEvent::FullBuffer if flushed => break,
                _ => {}
            }
        }
        harness.cancel.cancel();
    }
}
