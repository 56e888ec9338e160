#![forbid(unsafe_code)]

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use skene_core::{MediaError, MediaType, RANGE_EPSILON};
use skene_events::{BufferEvent, EventBus, StreamEvent};
use skene_manifest::{DecipherabilityUpdate, Manifest, Period, Representation};
use skene_net::{SegmentLoader, SegmentParser};
use skene_sink::BufferStore;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    abr::RepresentationPicker,
    clock::PlaybackTick,
    gc::enforce_memory_bounds,
    options::BufferOptions,
    period::{PeriodBuffer, PeriodCommand, PeriodEvent},
};

/// External control over the running orchestrator.
#[derive(Clone, Debug)]
pub enum ControlMessage {
    /// ABR picked another Representation for a type.
    SelectRepresentation {
        media_type: MediaType,
        representation_id: String,
    },
    /// The user switched tracks for a type.
    SelectAdaptation {
        media_type: MediaType,
        adaptation_id: String,
    },
    /// Keys changed; flush what can no longer be deciphered.
    Decipherability(DecipherabilityUpdate),
}

/// Everything the orchestrator needs to run.
pub struct OrchestratorConfig {
    pub manifest: Arc<Manifest>,
    pub store: Arc<Mutex<BufferStore>>,
    pub loader: Arc<dyn SegmentLoader>,
    pub parser: Arc<dyn SegmentParser>,
    pub picker: Arc<dyn RepresentationPicker>,
    pub clock: watch::Receiver<PlaybackTick>,
    pub options: BufferOptions,
    pub bus: EventBus,
}

/// Handle over a spawned orchestrator.
pub struct OrchestratorHandle {
    control: mpsc::UnboundedSender<ControlMessage>,
    cancel: CancellationToken,
}

impl OrchestratorHandle {
    pub fn select_representation(&self, media_type: MediaType, representation_id: impl Into<String>) {
        let _ = self.control.send(ControlMessage::SelectRepresentation {
            media_type,
            representation_id: representation_id.into(),
        });
    }

    pub fn select_adaptation(&self, media_type: MediaType, adaptation_id: impl Into<String>) {
        let _ = self.control.send(ControlMessage::SelectAdaptation {
            media_type,
            adaptation_id: adaptation_id.into(),
        });
    }

    pub fn decipherability_update(&self, update: DecipherabilityUpdate) {
        let _ = self.control.send(ControlMessage::Decipherability(update));
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for OrchestratorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Chains per-Period buffer pipelines into a seamless multi-Period
/// timeline, one pipeline per enabled track type, and aggregates their
/// completion into end-of-stream.
pub struct PeriodOrchestrator;

impl PeriodOrchestrator {
    /// Spawn the orchestration tasks. Audio and video run always; text
    /// and image only when the manifest carries such tracks.
    #[must_use]
    pub fn spawn(config: OrchestratorConfig) -> OrchestratorHandle {
        let cancel = CancellationToken::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        let mut enabled: Vec<MediaType> = vec![MediaType::Audio, MediaType::Video];
        for extra in [MediaType::Text, MediaType::Image] {
            if config
                .manifest
                .periods()
                .iter()
                .any(|p| !p.adaptations_for(extra).is_empty())
            {
                enabled.push(extra);
            }
        }
        info!(types = ?enabled, "starting period orchestrator");

        let mut type_controls = Vec::new();
        for media_type in &enabled {
            let (type_control_tx, type_control_rx) = mpsc::unbounded_channel();
            type_controls.push((*media_type, type_control_tx));
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let pipeline = TypePipeline {
                media_type: *media_type,
                manifest: Arc::clone(&config.manifest),
                store: Arc::clone(&config.store),
                loader: Arc::clone(&config.loader),
                parser: Arc::clone(&config.parser),
                picker: Arc::clone(&config.picker),
                clock: config.clock.clone(),
                options: config.options.clone(),
                bus: config.bus.clone(),
                control_rx: type_control_rx,
                status_tx: status_tx.clone(),
                cancel: cancel.child_token(),
                active: Vec::new(),
                events_tx,
                events_rx,
                complete: false,
                flush_in_progress: false,
            };
            tokio::spawn(pipeline.run());
        }

        let aggregator = Aggregator {
            manifest: Arc::clone(&config.manifest),
            clock: config.clock,
            bus: config.bus,
            control_rx,
            status_rx,
            type_controls,
            enabled: enabled.into_iter().collect(),
            cancel: cancel.clone(),
        };
        tokio::spawn(aggregator.run());

        OrchestratorHandle {
            control: control_tx,
            cancel,
        }
    }
}

/// Parent task: active-Period tracking, out-of-manifest warnings,
/// control routing and end-of-stream aggregation.
struct Aggregator {
    manifest: Arc<Manifest>,
    clock: watch::Receiver<PlaybackTick>,
    bus: EventBus,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    status_rx: mpsc::UnboundedReceiver<(MediaType, bool)>,
    type_controls: Vec<(MediaType, mpsc::UnboundedSender<ControlMessage>)>,
    enabled: HashSet<MediaType>,
    cancel: CancellationToken,
}

impl Aggregator {
    async fn run(mut self) {
        let mut active_period: Option<String> = None;
        let mut complete: HashSet<MediaType> = HashSet::new();
        let mut ended = false;
        let mut out_of_manifest = false;

        // Announce the Period under the initial position.
        self.observe_position(&mut active_period, &mut out_of_manifest);

        enum Arm {
            Stop,
            Tick,
            Control(Option<ControlMessage>),
            Status(Option<(MediaType, bool)>),
        }

        loop {
            let arm = {
                let clock = &mut self.clock;
                let control_rx = &mut self.control_rx;
                let status_rx = &mut self.status_rx;
                let cancel = &self.cancel;
                tokio::select! {
                    _ = cancel.cancelled() => Arm::Stop,
                    changed = clock.changed() => {
                        if changed.is_err() { Arm::Stop } else { Arm::Tick }
                    }
                    message = control_rx.recv() => Arm::Control(message),
                    status = status_rx.recv() => Arm::Status(status),
                }
            };
            match arm {
                Arm::Stop => break,
                Arm::Tick => {
                    self.observe_position(&mut active_period, &mut out_of_manifest);
                }
                Arm::Control(None) => break,
                Arm::Control(Some(message)) => self.route(message),
                Arm::Status(None) => break,
                Arm::Status(Some((media_type, is_complete))) => {
                    if is_complete {
                        complete.insert(media_type);
                        if complete == self.enabled && !ended {
                            ended = true;
                            info!("all buffer types complete");
                            self.bus.publish(StreamEvent::EndOfStream);
                        }
                    } else {
                        complete.remove(&media_type);
                        if ended {
                            ended = false;
                            self.bus.publish(StreamEvent::ResumeStream);
                        }
                    }
                }
            }
        }
    }

    fn observe_position(&self, active_period: &mut Option<String>, out_of_manifest: &mut bool) {
        let tick = *self.clock.borrow();
        let wanted = tick.wanted_position();

        if let Some(period) = self.manifest.period_containing(wanted) {
            if active_period.as_deref() != Some(period.id.as_str()) {
                debug!(period = %period.id, wanted, "active period changed");
                *active_period = Some(period.id.clone());
                self.bus.publish(StreamEvent::ActivePeriodChanged {
                    period_id: period.id.clone(),
                });
            }
        }

        let before = wanted < self.manifest.minimum_position - RANGE_EPSILON;
        let after = wanted > self.manifest.maximum_position + RANGE_EPSILON;
        if (before || after) && !*out_of_manifest {
            *out_of_manifest = true;
            let warning = if before {
                MediaError::before_manifest(wanted, self.manifest.minimum_position)
            } else {
                MediaError::after_manifest(wanted, self.manifest.maximum_position)
            };
            warn!(%warning, "wanted position outside manifest bounds");
            self.bus.publish(StreamEvent::Warning(warning));
        } else if !before && !after {
            *out_of_manifest = false;
        }
    }

    fn route(&self, message: ControlMessage) {
        match message {
            ControlMessage::SelectRepresentation { media_type, .. }
            | ControlMessage::SelectAdaptation { media_type, .. } => {
                if let Some((_, tx)) = self.type_controls.iter().find(|(t, _)| *t == media_type) {
                    let _ = tx.send(message.clone());
                }
            }
            ControlMessage::Decipherability(ref update) => {
                for (media_type, tx) in &self.type_controls {
                    if update.undecipherable_for(*media_type).next().is_some() {
                        let _ = tx.send(ControlMessage::Decipherability(update.clone()));
                    }
                }
            }
        }
    }
}

/// One Period currently considered by a type pipeline.
struct ActivePeriod {
    period: Arc<Period>,
    /// `None` for Periods that carry no track of this type (they are
    /// trivially full but still occupy the timeline).
    commands: Option<mpsc::UnboundedSender<PeriodCommand>>,
    cancel: CancellationToken,
}

/// Consecutive-Period buffering for one track type.
struct TypePipeline {
    media_type: MediaType,
    manifest: Arc<Manifest>,
    store: Arc<Mutex<BufferStore>>,
    loader: Arc<dyn SegmentLoader>,
    parser: Arc<dyn SegmentParser>,
    picker: Arc<dyn RepresentationPicker>,
    clock: watch::Receiver<PlaybackTick>,
    options: BufferOptions,
    bus: EventBus,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
    status_tx: mpsc::UnboundedSender<(MediaType, bool)>,
    cancel: CancellationToken,
    active: Vec<ActivePeriod>,
    events_tx: mpsc::UnboundedSender<(String, PeriodEvent)>,
    events_rx: mpsc::UnboundedReceiver<(String, PeriodEvent)>,
    complete: bool,
    flush_in_progress: bool,
}

impl TypePipeline {
    async fn run(mut self) {
        let initial = self.clock.borrow().wanted_position();
        self.start_consecutive(initial);

        enum Arm {
            Stop,
            Tick,
            Control(Option<ControlMessage>),
            Event(Option<(String, PeriodEvent)>),
        }

        loop {
            let arm = {
                let clock = &mut self.clock;
                let control_rx = &mut self.control_rx;
                let events_rx = &mut self.events_rx;
                let cancel = &self.cancel;
                tokio::select! {
                    _ = cancel.cancelled() => Arm::Stop,
                    changed = clock.changed() => {
                        if changed.is_err() { Arm::Stop } else { Arm::Tick }
                    }
                    message = control_rx.recv() => Arm::Control(message),
                    event = events_rx.recv() => Arm::Event(event),
                }
            };
            match arm {
                Arm::Stop | Arm::Control(None) | Arm::Event(None) => break,
                Arm::Tick => self.on_tick(),
                Arm::Control(Some(message)) => self.on_control(message),
                Arm::Event(Some((period_id, event))) => self.on_period_event(period_id, event),
            }
        }

        while let Some(active) = self.active.pop() {
            active.cancel.cancel();
        }
    }

    /// Create the Period buffer for the Period at `time` and let
    /// `full-buffer` chaining take it from there.
    fn start_consecutive(&mut self, time: f64) {
        let period = self
            .manifest
            .period_containing(time)
            .or_else(|| self.manifest.periods().iter().find(|p| p.start >= time))
            .cloned();
        let Some(period) = period else {
            debug!(media_type = %self.media_type, time, "no period at or after position");
            if !self.manifest.is_dynamic {
                self.mark_complete();
            }
            return;
        };
        self.create_period_buffer(period);
    }

    fn create_period_buffer(&mut self, period: Arc<Period>) {
        if !period.is_loaded {
            // Partial (xlink) Period: somebody has to resolve it first.
            self.bus.publish(StreamEvent::NeedsLoadedPeriod {
                media_type: self.media_type,
                period_id: period.id.clone(),
            });
            return;
        }

        if period.adaptations_for(self.media_type).is_empty() {
            // Trivially full; keep it in the list so the out-of-bounds
            // check still sees a contiguous timeline, and chain on.
            debug!(
                media_type = %self.media_type,
                period = %period.id,
                "period has no track of this type"
            );
            self.active.push(ActivePeriod {
                period: Arc::clone(&period),
                commands: None,
                cancel: self.cancel.child_token(),
            });
            self.chain_after(&period.id.clone());
            return;
        }

        let codec = period
            .adaptations_for(self.media_type)
            .first()
            .and_then(|a| self.picker.pick(a))
            .map(|r| r.codec.clone())
            .unwrap_or_default();
        let slot = match self.store.lock().get_or_create(self.media_type, &codec) {
            Ok(slot) => slot,
            Err(error) => {
                warn!(media_type = %self.media_type, %error, "cannot create decoder buffer");
                self.bus.publish(StreamEvent::Warning(
                    MediaError::unknown_buffer_type(self.media_type),
                ));
                return;
            }
        };

        info!(
            media_type = %self.media_type,
            period = %period.id,
            start = period.start,
            "creating period buffer"
        );
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (period_events_tx, mut period_events_rx) = mpsc::unbounded_channel();
        let child_cancel = self.cancel.child_token();
        let buffer = PeriodBuffer::new(
            self.media_type,
            Arc::clone(&self.manifest),
            Arc::clone(&period),
            slot,
            Arc::clone(&self.loader),
            Arc::clone(&self.parser),
            Arc::clone(&self.picker),
            self.clock.clone(),
            self.options.clone(),
            cmd_rx,
            period_events_tx,
            child_cancel.clone(),
        );
        tokio::spawn(buffer.run());

        // Tag this Period's events with its id for the shared channel.
        let events_tx = self.events_tx.clone();
        let period_id = period.id.clone();
        let forward_cancel = child_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => break,
                    event = period_events_rx.recv() => match event {
                        Some(event) => {
                            if events_tx.send((period_id.clone(), event)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        self.active.push(ActivePeriod {
            period,
            commands: Some(cmd_tx),
            cancel: child_cancel,
        });
    }

    fn on_period_event(&mut self, period_id: String, event: PeriodEvent) {
        match event {
            PeriodEvent::AddedSegment {
                representation_id,
                segment,
                buffered,
                data,
            } => {
                self.bus.publish(BufferEvent::AddedSegment {
                    media_type: self.media_type,
                    period_id,
                    representation_id,
                    segment_id: segment.id,
                    buffered,
                    data,
                });
            }
            PeriodEvent::FullBuffer => {
                self.bus.publish(BufferEvent::FullBuffer {
                    media_type: self.media_type,
                });
                self.chain_after(&period_id);
            }
            PeriodEvent::ActiveBuffer => {
                self.bus.publish(BufferEvent::ActiveBuffer {
                    media_type: self.media_type,
                });
                self.destroy_downstream(&period_id);
                self.mark_incomplete();
            }
            PeriodEvent::NeedsReload { position } => {
                self.bus
                    .publish(BufferEvent::NeedsMediaSourceReload { position });
                self.mark_incomplete();
            }
            PeriodEvent::FlushedUndecipherable { position } => {
                self.flush_in_progress = false;
                self.bus
                    .publish(BufferEvent::NeedsDecipherabilityFlush { position });
                self.mark_incomplete();
            }
            PeriodEvent::Warning(warning) => {
                self.bus.publish(StreamEvent::Warning(warning));
            }
            PeriodEvent::Fatal(error) => {
                // Destroy everything and restart from the current
                // position; unrecoverable situations surface as the
                // restart failing the same way.
                warn!(media_type = %self.media_type, %error, "fatal buffer error, restarting pipelines");
                self.bus.publish(StreamEvent::Warning(error));
                self.destroy_all();
                self.mark_incomplete();
                let wanted = self.clock.borrow().wanted_position();
                self.start_consecutive(wanted);
            }
        }
    }

    fn on_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::SelectRepresentation {
                representation_id, ..
            } => {
                let wanted = self.clock.borrow().wanted_position();
                let Some(active) = self.active_for(wanted) else {
                    return;
                };
                let Some(representation) =
                    find_representation(&active.period, self.media_type, &representation_id)
                else {
                    warn!(
                        media_type = %self.media_type,
                        representation = %representation_id,
                        "unknown representation requested"
                    );
                    return;
                };
                if let Some(commands) = &active.commands {
                    let _ = commands.send(PeriodCommand::SelectRepresentation(representation));
                }
            }
            ControlMessage::SelectAdaptation { adaptation_id, .. } => {
                let wanted = self.clock.borrow().wanted_position();
                let Some(active) = self.active_for(wanted) else {
                    return;
                };
                let adaptation = active
                    .period
                    .adaptations_for(self.media_type)
                    .iter()
                    .find(|a| a.id == adaptation_id)
                    .cloned();
                match (adaptation, &active.commands) {
                    (Some(adaptation), Some(commands)) => {
                        let _ = commands.send(PeriodCommand::SelectAdaptation(adaptation));
                    }
                    _ => warn!(
                        media_type = %self.media_type,
                        adaptation = %adaptation_id,
                        "unknown adaptation requested"
                    ),
                }
            }
            ControlMessage::Decipherability(update) => {
                let ids: Vec<String> = update
                    .undecipherable_for(self.media_type)
                    .map(str::to_string)
                    .collect();
                if ids.is_empty() {
                    return;
                }
                self.flush_in_progress = true;
                for active in &self.active {
                    if let Some(commands) = &active.commands {
                        let _ = commands.send(PeriodCommand::DecipherabilityFlush(ids.clone()));
                    }
                }
            }
        }
    }

    fn on_tick(&mut self) {
        let tick = *self.clock.borrow();
        let wanted = tick.wanted_position();

        if let Some(slot) = self.store.lock().get(self.media_type) {
            enforce_memory_bounds(&slot.queue, self.media_type, tick.position, &self.options);
        }

        // Destroy Periods the clock has fully passed.
        while let Some(first) = self.active.first() {
            let passed = first
                .period
                .end()
                .is_some_and(|end| wanted >= end && tick.position >= end);
            let is_final_period = self.active.len() == 1
                && self.manifest.period_after(&first.period).is_none();
            if !passed || is_final_period {
                break;
            }
            let removed = self.active.remove(0);
            removed.cancel.cancel();
            info!(
                media_type = %self.media_type,
                period = %removed.period.id,
                "period buffer cleared behind playhead"
            );
            self.bus.publish(StreamEvent::PeriodBufferCleared {
                media_type: self.media_type,
                period_id: removed.period.id.clone(),
            });
        }

        if self.active.is_empty() {
            self.start_consecutive(wanted);
            return;
        }

        // Out-of-bounds restart, gated on a non-empty period list and
        // suspended while a decipherability flush is in flight.
        if self.flush_in_progress {
            return;
        }
        let union_start = self.active[0].period.start;
        let union_end = self
            .active
            .last()
            .and_then(|a| a.period.end())
            .unwrap_or(f64::INFINITY);
        let outside =
            wanted < union_start - RANGE_EPSILON || wanted >= union_end;
        if outside && self.manifest.period_containing(wanted).is_some() {
            info!(
                media_type = %self.media_type,
                wanted,
                union_start,
                union_end,
                "position left considered periods, restarting"
            );
            self.destroy_all();
            self.mark_incomplete();
            self.start_consecutive(wanted);
        }
    }

    fn chain_after(&mut self, period_id: &str) {
        let Some(last) = self.active.last() else {
            return;
        };
        if last.period.id != period_id {
            // An upstream Period refilled; downstream buffers already
            // exist.
            return;
        }
        let last_period = Arc::clone(&last.period);
        match self.manifest.period_after(&last_period) {
            Some(next) => {
                let next = Arc::clone(next);
                self.create_period_buffer(next);
            }
            None => {
                if !self.manifest.is_dynamic {
                    self.mark_complete();
                }
            }
        }
    }

    fn active_for(&self, wanted: f64) -> Option<&ActivePeriod> {
        self.active
            .iter()
            .find(|a| a.period.contains(wanted))
            .or(self.active.first())
    }

    fn destroy_downstream(&mut self, period_id: &str) {
        let Some(index) = self.active.iter().position(|a| a.period.id == period_id) else {
            return;
        };
        while self.active.len() > index + 1 {
            let Some(removed) = self.active.pop() else {
                break;
            };
            removed.cancel.cancel();
            debug!(
                media_type = %self.media_type,
                period = %removed.period.id,
                "downstream period buffer destroyed"
            );
            self.bus.publish(StreamEvent::PeriodBufferCleared {
                media_type: self.media_type,
                period_id: removed.period.id.clone(),
            });
        }
    }

    fn destroy_all(&mut self) {
        while let Some(removed) = self.active.pop() {
            removed.cancel.cancel();
            self.bus.publish(StreamEvent::PeriodBufferCleared {
                media_type: self.media_type,
                period_id: removed.period.id.clone(),
            });
        }
    }

    fn mark_complete(&mut self) {
        if !self.complete {
            self.complete = true;
            info!(media_type = %self.media_type, "buffering complete");
            self.bus.publish(StreamEvent::BufferComplete {
                media_type: self.media_type,
            });
            let _ = self.status_tx.send((self.media_type, true));
        }
    }

    fn mark_incomplete(&mut self) {
        if self.complete {
            self.complete = false;
            let _ = self.status_tx.send((self.media_type, false));
        }
    }
}

fn find_representation(
    period: &Period,
    media_type: MediaType,
    representation_id: &str,
) -> Option<Arc<Representation>> {
    period
        .adaptations_for(media_type)
        .iter()
        .find_map(|a| a.representation(representation_id).cloned())
}
