#![forbid(unsafe_code)]

use std::{
    collections::VecDeque,
    hash::Hasher,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use skene_core::{MediaType, TimeRanges};
use tokio::sync::{broadcast, mpsc, oneshot, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use twox_hash::XxHash64;

use crate::{
    error::{SinkError, SinkResult},
    raw::{RawBufferEvent, RawMediaBuffer},
};

/// One pushable unit: optional decoder configuration bytes plus optional
/// media bytes, with the buffer configuration both must be appended under.
#[derive(Clone, Debug)]
pub struct PushedChunk {
    pub init_data: Option<Bytes>,
    pub data: Option<Bytes>,
    pub codec: String,
    pub timestamp_offset: f64,
    /// `None` components mean "unbounded" (0 / +∞).
    pub append_window: (Option<f64>, Option<f64>),
    /// Announced time extent of `data`, for buffers that cannot derive it.
    pub bounds: Option<(f64, f64)>,
}

enum QueuedOperation {
    Push {
        chunk: PushedChunk,
        done: oneshot::Sender<SinkResult<TimeRanges>>,
    },
    Remove {
        start: f64,
        end: f64,
        done: oneshot::Sender<SinkResult<TimeRanges>>,
    },
    SwitchCodec {
        codec: String,
        done: oneshot::Sender<SinkResult<TimeRanges>>,
    },
}

impl QueuedOperation {
    fn is_cancelled(&self) -> bool {
        match self {
            Self::Push { done, .. } | Self::Remove { done, .. } | Self::SwitchCodec { done, .. } => {
                done.is_closed()
            }
        }
    }

    fn fail(self, error: SinkError) {
        match self {
            Self::Push { done, .. } | Self::Remove { done, .. } | Self::SwitchCodec { done, .. } => {
                let _ = done.send(Err(error));
            }
        }
    }
}

/// Completion handle for one queued operation.
///
/// Dropping the handle before the operation starts cancels it; dropping
/// it afterwards merely abandons the result, the mutation still runs to
/// completion. Use [`detach`](Self::detach) for fire-and-forget
/// operations that must not be cancelled.
pub struct OperationHandle {
    rx: oneshot::Receiver<SinkResult<TimeRanges>>,
}

impl OperationHandle {
    /// Wait for the mutation to reach the decoder buffer. Resolves with
    /// the buffered ranges observed right after it.
    pub async fn wait(self) -> SinkResult<TimeRanges> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(SinkError::QueueClosed),
        }
    }

    /// Keep the operation alive without awaiting its result.
    pub fn detach(self) {
        tokio::spawn(async move {
            let _ = self.rx.await;
        });
    }
}

/// FIFO-serialised access to one decoder buffer.
///
/// The queue exclusively owns its [`RawMediaBuffer`] inside a spawned
/// task; at most one mutation is ever in flight. A watchdog re-checks the
/// buffer every `flush_interval` to recover from platforms that drop
/// `updateend` notifications.
pub struct SerializedBufferQueue {
    media_type: MediaType,
    op_tx: mpsc::UnboundedSender<QueuedOperation>,
    ranges_rx: watch::Receiver<TimeRanges>,
    abort_requested: Arc<AtomicBool>,
    abort_notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl SerializedBufferQueue {
    /// Spawn the queue task around `buffer`. Must run under a tokio
    /// runtime.
    #[must_use]
    pub fn new(
        media_type: MediaType,
        buffer: Box<dyn RawMediaBuffer>,
        flush_interval: Duration,
    ) -> Self {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (ranges_tx, ranges_rx) = watch::channel(buffer.buffered());
        let abort_requested = Arc::new(AtomicBool::new(false));
        let abort_notify = Arc::new(Notify::new());
        let cancel = CancellationToken::new();

        let task = QueueTask {
            media_type,
            buffer,
            op_rx,
            pending: VecDeque::new(),
            ranges_tx,
            last_init_hash: None,
            flush_interval,
            abort_requested: Arc::clone(&abort_requested),
            abort_notify: Arc::clone(&abort_notify),
            cancel: cancel.clone(),
        };
        tokio::spawn(task.run());

        Self {
            media_type,
            op_tx,
            ranges_rx,
            abort_requested,
            abort_notify,
            cancel,
        }
    }

    #[must_use]
    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    /// Queue an append. Expanded internally into an init step (skipped if
    /// the same init bytes are already configured) followed by a media
    /// step.
    pub fn push_chunk(&self, chunk: PushedChunk) -> OperationHandle {
        self.submit(|done| QueuedOperation::Push { chunk, done })
    }

    /// Queue a removal of `[start, end)` seconds.
    pub fn remove_buffer(&self, start: f64, end: f64) -> OperationHandle {
        self.submit(|done| QueuedOperation::Remove { start, end, done })
    }

    /// Queue an in-place codec switch, ahead of any push carrying the new
    /// codec.
    pub fn switch_codec(&self, codec: impl Into<String>) -> OperationHandle {
        let codec = codec.into();
        self.submit(|done| QueuedOperation::SwitchCodec { codec, done })
    }

    fn submit(
        &self,
        build: impl FnOnce(oneshot::Sender<SinkResult<TimeRanges>>) -> QueuedOperation,
    ) -> OperationHandle {
        let (done, rx) = oneshot::channel();
        if self.op_tx.send(build(done)).is_err() {
            // Task gone: the receiver will observe QueueClosed.
        }
        OperationHandle { rx }
    }

    /// Latest buffered ranges observed after a completed mutation.
    #[must_use]
    pub fn buffered_ranges(&self) -> TimeRanges {
        self.ranges_rx.borrow().clone()
    }

    /// Fail every not-yet-started operation and reset the decoder
    /// buffer's append state. In-flight mutations run to completion.
    pub fn abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
        self.abort_notify.notify_one();
    }

    /// Shut the queue down; pending operations fail with `Aborted` and the
    /// decoder buffer is released.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SerializedBufferQueue {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn hash_init(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}

struct QueueTask {
    media_type: MediaType,
    buffer: Box<dyn RawMediaBuffer>,
    op_rx: mpsc::UnboundedReceiver<QueuedOperation>,
    pending: VecDeque<QueuedOperation>,
    ranges_tx: watch::Sender<TimeRanges>,
    last_init_hash: Option<u64>,
    flush_interval: Duration,
    abort_requested: Arc<AtomicBool>,
    abort_notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl QueueTask {
    async fn run(mut self) {
        let mut events = self.buffer.subscribe();
        loop {
            while let Ok(op) = self.op_rx.try_recv() {
                self.pending.push_back(op);
            }

            if self.abort_requested.swap(false, Ordering::SeqCst) {
                debug!(media_type = %self.media_type, pending = self.pending.len(), "buffer queue aborted");
                for op in self.pending.drain(..) {
                    op.fail(SinkError::Aborted);
                }
                self.buffer.abort();
                self.last_init_hash = None;
                self.publish_ranges();
                continue;
            }

            let Some(op) = self.pending.pop_front() else {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = self.abort_notify.notified() => continue,
                    op = self.op_rx.recv() => match op {
                        Some(op) => {
                            self.pending.push_back(op);
                            continue;
                        }
                        None => break,
                    },
                }
            };

            if op.is_cancelled() {
                trace!(media_type = %self.media_type, "dropping cancelled operation");
                continue;
            }
            self.execute(op, &mut events).await;

            if self.cancel.is_cancelled() {
                break;
            }
        }

        for op in self.pending.drain(..) {
            op.fail(SinkError::Aborted);
        }
        self.buffer.abort();
    }

    async fn execute(
        &mut self,
        op: QueuedOperation,
        events: &mut broadcast::Receiver<RawBufferEvent>,
    ) {
        match op {
            QueuedOperation::Push { chunk, done } => {
                let result = self.run_push(&chunk, events).await;
                let _ = done.send(result.map(|()| self.buffer.buffered()));
                self.publish_ranges();
            }
            QueuedOperation::Remove { start, end, done } => {
                let result = self.run_remove(start, end, events).await;
                let _ = done.send(result.map(|()| self.buffer.buffered()));
                self.publish_ranges();
            }
            QueuedOperation::SwitchCodec { codec, done } => {
                self.apply_codec(&codec);
                let _ = done.send(Ok(self.buffer.buffered()));
            }
        }
    }

    async fn run_push(
        &mut self,
        chunk: &PushedChunk,
        events: &mut broadcast::Receiver<RawBufferEvent>,
    ) -> SinkResult<()> {
        if let Some(init) = &chunk.init_data {
            let hash = hash_init(init);
            if self.last_init_hash == Some(hash) {
                trace!(media_type = %self.media_type, "init segment already configured, skipping");
            } else {
                self.reconcile(chunk)?;
                self.buffer.append_buffer(init, None)?;
                if let Err(message) = self.wait_update_end(events).await {
                    self.last_init_hash = None;
                    return Err(SinkError::Append(message));
                }
                self.last_init_hash = Some(hash);
            }
        }

        if let Some(data) = &chunk.data {
            self.reconcile(chunk)?;
            self.buffer.append_buffer(data, chunk.bounds)?;
            if let Err(message) = self.wait_update_end(events).await {
                // Forget the init so it is re-pushed before the next
                // media chunk.
                self.last_init_hash = None;
                return Err(SinkError::Append(message));
            }
        }
        Ok(())
    }

    async fn run_remove(
        &mut self,
        start: f64,
        end: f64,
        events: &mut broadcast::Receiver<RawBufferEvent>,
    ) -> SinkResult<()> {
        trace!(media_type = %self.media_type, start, end, "removing buffer range");
        self.buffer.remove(start, end)?;
        self.wait_update_end(events)
            .await
            .map_err(SinkError::Remove)
    }

    fn apply_codec(&mut self, codec: &str) {
        if self.buffer.codec() == codec {
            return;
        }
        if self.buffer.try_switch_codec(codec) {
            debug!(media_type = %self.media_type, codec, "in-place codec switch");
        } else {
            warn!(
                media_type = %self.media_type,
                codec,
                "in-place codec switch refused, keeping previous codec"
            );
        }
    }

    /// Align the buffer's configuration with the chunk before a step.
    /// Each knob is touched only when it differs.
    fn reconcile(&mut self, chunk: &PushedChunk) -> SinkResult<()> {
        self.apply_codec(&chunk.codec);

        if (self.buffer.timestamp_offset() - chunk.timestamp_offset).abs() > f64::EPSILON {
            self.buffer
                .set_timestamp_offset(chunk.timestamp_offset)
                .map_err(|e| SinkError::Configuration(e.to_string()))?;
        }

        let (want_start, want_end) = chunk.append_window;
        match want_start {
            None => {
                if self.buffer.append_window_start() > 0.0 {
                    self.buffer
                        .set_append_window_start(0.0)
                        .map_err(|e| SinkError::Configuration(e.to_string()))?;
                }
            }
            Some(start) => {
                if (start - self.buffer.append_window_start()).abs() > f64::EPSILON {
                    if start >= self.buffer.append_window_end() {
                        // The window end must stay above the start; widen
                        // it first.
                        self.buffer
                            .set_append_window_end(start + 1.0)
                            .map_err(|e| SinkError::Configuration(e.to_string()))?;
                    }
                    self.buffer
                        .set_append_window_start(start)
                        .map_err(|e| SinkError::Configuration(e.to_string()))?;
                }
            }
        }
        match want_end {
            None => {
                if self.buffer.append_window_end().is_finite() {
                    self.buffer
                        .set_append_window_end(f64::INFINITY)
                        .map_err(|e| SinkError::Configuration(e.to_string()))?;
                }
            }
            Some(end) => {
                let current = self.buffer.append_window_end();
                if current.is_infinite() || (end - current).abs() > f64::EPSILON {
                    self.buffer
                        .set_append_window_end(end)
                        .map_err(|e| SinkError::Configuration(e.to_string()))?;
                }
            }
        }
        Ok(())
    }

    /// Wait until the buffer reports quiescence for the in-flight
    /// mutation. The watchdog interval recovers from missing events.
    async fn wait_update_end(
        &mut self,
        events: &mut broadcast::Receiver<RawBufferEvent>,
    ) -> Result<(), String> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err("queue disposed during mutation".to_string());
                }
                event = events.recv() => match event {
                    Ok(RawBufferEvent::UpdateEnd) => return Ok(()),
                    Ok(RawBufferEvent::Error(message)) => return Err(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(media_type = %self.media_type, skipped, "buffer events lagged");
                        if !self.buffer.updating() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err("buffer event channel closed".to_string());
                    }
                },
                _ = tokio::time::sleep(self.flush_interval) => {
                    if !self.buffer.updating() {
                        warn!(
                            media_type = %self.media_type,
                            "no updateend received, advancing via watchdog"
                        );
                        return Ok(());
                    }
                }
            }
        }
    }

    fn publish_ranges(&self) {
        self.ranges_tx.send_replace(self.buffer.buffered());
    }
}
