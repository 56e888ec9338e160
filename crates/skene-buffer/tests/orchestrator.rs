#![forbid(unsafe_code)]

//! End-to-end orchestration over a two-Period presentation: chaining,
//! clearing, end-of-stream aggregation, out-of-manifest warnings and
//! seek-back restarts.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use skene_buffer::{
    BufferOptions, LowestBitratePicker, OrchestratorConfig, PeriodOrchestrator, PlaybackClock,
};
use skene_core::{MediaErrorCode, MediaType};
use skene_events::{Event, EventBus, StreamEvent};
use skene_manifest::{Adaptation, Manifest, Period, Representation, TimelineIndex};
use skene_net::{IdentityParser, LoadedSegment, NetResult, SegmentLoader, SegmentRequest};
use skene_sink::{BufferStore, ManualBufferFactory};
use tokio::sync::broadcast;
use url::Url;

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

fn video_representation(id: &str, period_start: f64, period_end: f64) -> Arc<Representation> {
    let segment_count = ((period_end - period_start) / 4.0).ceil() as i64;
    let index = TimelineIndex::builder(id, 1)
        .period_start(period_start)
        .period_end(period_end)
        .presentation_time_offset(period_start as i64)
        .media_template(format!("http://cdn.example/{id}/$Time$.m4s"))
        .init_url(Url::parse(&format!("http://cdn.example/{id}/init.mp4")).unwrap())
        .entries(vec![skene_manifest::timeline::TimelineEntry {
            start: period_start as i64,
            duration: 4,
            repeat_count: segment_count - 1,
            first_number: 1,
        }])
        .build();
    Arc::new(Representation {
        id: id.into(),
        bitrate: 1_000_000,
        codec: "avc1.64001f".into(),
        mime_type: "video/mp4".into(),
        index: Arc::new(index),
    })
}

fn video_period(id: &str, start: f64, duration: f64) -> Arc<Period> {
    let repr = video_representation(&format!("{id}-video"), start, start + duration);
    let adaptation = Arc::new(Adaptation {
        id: format!("{id}-video-main"),
        media_type: MediaType::Video,
        representations: vec![repr],
    });
    Arc::new(Period {
        id: id.into(),
        start,
        duration: Some(duration),
        adaptations: BTreeMap::from([(MediaType::Video, vec![adaptation])]),
        is_loaded: true,
    })
}

struct World {
    clock: PlaybackClock,
    rx: broadcast::Receiver<Event>,
}

fn launch(manifest: Manifest) -> (World, skene_buffer::OrchestratorHandle) {
    let clock = PlaybackClock::new();
    let bus = EventBus::new(256);
    let rx = bus.subscribe();
    let store = Arc::new(Mutex::new(BufferStore::new(
        Arc::new(ManualBufferFactory),
        Duration::from_millis(50),
    )));
    let handle = PeriodOrchestrator::spawn(OrchestratorConfig {
        manifest: Arc::new(manifest),
        store,
        loader: Arc::new(EchoLoader),
        parser: Arc::new(IdentityParser),
        picker: Arc::new(LowestBitratePicker),
        clock: clock.observe(),
        options: BufferOptions::default().with_wanted_buffer_ahead(200.0),
        bus: bus.clone(),
    });
    (World { clock, rx }, handle)
}

async fn next_event(rx: &mut broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("orchestrator stalled")
        .expect("event bus closed")
}

async fn collect_until(
    rx: &mut broadcast::Receiver<Event>,
    mut stop: impl FnMut(&Event) -> bool,
) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn two_period_manifest() -> Manifest {
    Manifest::new(
        vec![video_period("p1", 0.0, 60.0), video_period("p2", 60.0, 40.0)],
        false,
        0.0,
        100.0,
    )
}

#[tokio::test]
async fn two_periods_chain_to_end_of_stream() {
    let (mut world, handle) = launch(two_period_manifest());
    world.clock.set_position(0.0);

    let events = collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::EndOfStream))
    })
    .await;

    // Both Periods were buffered (video), audio is trivially complete.
    let complete_types: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Stream(StreamEvent::BufferComplete { media_type }) => Some(*media_type),
            _ => None,
        })
        .collect();
    assert!(complete_types.contains(&MediaType::Video));
    assert!(complete_types.contains(&MediaType::Audio));

    // Segments from both periods were appended and reported.
    let periods_with_segments: std::collections::HashSet<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Buffer(skene_events::BufferEvent::AddedSegment { period_id, .. }) => {
                Some(period_id.clone())
            }
            _ => None,
        })
        .collect();
    assert!(periods_with_segments.contains("p1"));
    assert!(periods_with_segments.contains("p2"));

    // Exactly one active-period-changed so far: the clock never moved.
    let active_changes: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Stream(StreamEvent::ActivePeriodChanged { period_id }) => {
                Some(period_id.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(active_changes, vec!["p1".to_string()]);

    handle.stop();
}

#[tokio::test]
async fn crossing_a_period_boundary_clears_and_reannounces() {
    let (mut world, handle) = launch(two_period_manifest());
    world.clock.set_position(0.0);
    collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::EndOfStream))
    })
    .await;

    world.clock.set_position(70.0);
    let mut cleared = false;
    let mut reannounced = false;
    collect_until(&mut world.rx, |e| {
        match e {
            Event::Stream(StreamEvent::PeriodBufferCleared {
                media_type: MediaType::Video,
                period_id,
            }) if period_id == "p1" => cleared = true,
            Event::Stream(StreamEvent::ActivePeriodChanged { period_id }) if period_id == "p2" => {
                reannounced = true;
            }
            _ => {}
        }
        cleared && reannounced
    })
    .await;

    handle.stop();
}

#[tokio::test]
async fn seeking_past_manifest_end_warns_without_terminating() {
    let (mut world, handle) = launch(two_period_manifest());
    world.clock.set_position(0.0);
    collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::EndOfStream))
    })
    .await;

    world.clock.set_position(110.0);
    let events = collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::Warning(w)) if w.code == MediaErrorCode::MediaTimeAfterManifest)
    })
    .await;
    let warning = events
        .iter()
        .find_map(|e| match e {
            Event::Stream(StreamEvent::Warning(w)) => Some(w.clone()),
            _ => None,
        })
        .unwrap();
    assert!(!warning.fatal);

    // The pipeline survives: seeking back in resumes buffering.
    world.clock.set_position(10.0);
    collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::ActivePeriodChanged { period_id }) if period_id == "p1")
    })
    .await;

    handle.stop();
}

#[tokio::test]
async fn seek_back_restarts_and_resumes_stream() {
    let (mut world, handle) = launch(two_period_manifest());
    world.clock.set_position(0.0);
    collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::EndOfStream))
    })
    .await;

    // Pass the first Period so it gets cleared...
    world.clock.set_position(70.0);
    collect_until(&mut world.rx, |e| {
        matches!(
            e,
            Event::Stream(StreamEvent::PeriodBufferCleared { period_id, .. }) if period_id == "p1"
        )
    })
    .await;

    // ...then seek back into it: the pipeline restarts and completes
    // again.
    world.clock.set_position(5.0);
    let events = collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::EndOfStream))
    })
    .await;
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Stream(StreamEvent::ResumeStream))));

    handle.stop();
}

#[tokio::test]
async fn text_pipeline_only_runs_when_manifest_has_text() {
    // No text adaptations anywhere: completing without ever creating a
    // text buffer proves the type was not enabled.
    let (mut world, handle) = launch(two_period_manifest());
    world.clock.set_position(0.0);
    let events = collect_until(&mut world.rx, |e| {
        matches!(e, Event::Stream(StreamEvent::EndOfStream))
    })
    .await;
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::Stream(StreamEvent::BufferComplete {
            media_type: MediaType::Text
        })
    )));
    handle.stop();
}
