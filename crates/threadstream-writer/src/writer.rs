//! Throttled producer that persists one generation step as stream chunks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use threadstream_core::{NewStream, Part, StreamDelta, StreamId, compact_parts};
use tokio::sync::{OnceCell, watch};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::StreamingOptions;
use crate::errors::{StoreError, WriterError};
use crate::store::{AppendOutcome, StreamStore};

/// Reason recorded when an append is rejected because the stream was aborted
/// elsewhere.
pub const REJECTED_REASON: &str = "stream aborted externally";
/// Reason written when the abort signal fires.
pub const SIGNAL_REASON: &str = "aborted";

/// Invoked once with the reason when the store rejects an append.
pub type AbortCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Finishing,
    Finished,
    Aborted { reason: String },
}

struct WriterState {
    phase: Phase,
    buffer: Vec<Part>,
    cursor: u64,
    last_flush: Option<Instant>,
    flushing: bool,
}

struct Batch {
    start: u64,
    end: u64,
    parts: Vec<Part>,
}

struct WriterInner {
    store: Arc<dyn StreamStore>,
    new_stream: NewStream,
    options: StreamingOptions,
    stream_id: OnceCell<StreamId>,
    state: Mutex<WriterState>,
    idle: watch::Sender<bool>,
    closed: watch::Sender<bool>,
    on_abort: Option<AbortCallback>,
}

impl WriterInner {
    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn throttle_elapsed(&self, state: &WriterState) -> bool {
        state
            .last_flush
            .is_none_or(|at| at.elapsed() >= self.options.throttle)
    }

    fn begin_flush(&self, state: &mut WriterState) {
        state.flushing = true;
        self.idle.send_replace(false);
    }

    fn settle(&self, state: &mut WriterState) {
        state.flushing = false;
        self.idle.send_replace(true);
    }

    fn take_batch(&self, state: &mut WriterState) -> Batch {
        let parts = std::mem::take(&mut state.buffer);
        let start = state.cursor;
        Batch {
            start,
            end: start + parts.len() as u64,
            parts,
        }
    }

    /// Marks the writer aborted after a rejected append. Returns the reason
    /// to report unless the writer was already aborting on its own.
    fn reject(&self, state: &mut WriterState) -> Option<String> {
        if matches!(state.phase, Phase::Aborted { .. }) {
            return None;
        }
        warn!(stream_id = ?self.stream_id.get(), "append rejected; stopping writer");
        state.phase = Phase::Aborted {
            reason: REJECTED_REASON.to_string(),
        };
        state.buffer.clear();
        self.closed.send_replace(true);
        Some(REJECTED_REASON.to_string())
    }

    fn notify_abort(&self, reason: Option<String>) {
        if let (Some(reason), Some(callback)) = (reason, &self.on_abort) {
            callback(&reason);
        }
    }

    async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }

    async fn write(&self, batch: &Batch) -> Result<AppendOutcome, StoreError> {
        let stream_id = self
            .stream_id
            .get_or_try_init(|| async {
                let stream_id = self.store.create_stream(self.new_stream.clone()).await?;
                debug!(
                    stream_id = %stream_id,
                    thread_id = %self.new_stream.thread_id,
                    order = self.new_stream.order,
                    step_order = self.new_stream.step_order,
                    "stream created"
                );
                Ok::<_, StoreError>(stream_id)
            })
            .await?
            .clone();
        let delta = StreamDelta {
            stream_id,
            start: batch.start,
            end: batch.end,
            parts: compact_parts(batch.parts.iter().cloned()),
        };
        debug!(
            stream_id = %delta.stream_id,
            start = delta.start,
            end = delta.end,
            parts = delta.parts.len(),
            "writing chunk"
        );
        self.store.append_delta(delta).await
    }
}

/// Puts unwritten parts back in front of anything buffered since.
fn requeue(state: &mut WriterState, mut parts: Vec<Part>) {
    parts.append(&mut state.buffer);
    state.buffer = parts;
}

enum Next {
    Continue,
    Stop(Option<String>),
}

/// Flushes buffered parts until the buffer is drained, the throttle window
/// has not yet elapsed again, or the writer leaves the open phase.
async fn flush_chain(inner: Arc<WriterInner>) {
    loop {
        let batch = {
            let mut state = inner.lock_state();
            if state.phase != Phase::Open || state.buffer.is_empty() {
                inner.settle(&mut state);
                return;
            }
            state.last_flush = Some(Instant::now());
            inner.take_batch(&mut state)
        };

        let outcome = inner.write(&batch).await;

        let next = {
            let mut state = inner.lock_state();
            match outcome {
                Ok(AppendOutcome::Appended) => {
                    state.cursor = batch.end;
                    if state.phase == Phase::Open
                        && !state.buffer.is_empty()
                        && inner.throttle_elapsed(&state)
                    {
                        Next::Continue
                    } else {
                        inner.settle(&mut state);
                        Next::Stop(None)
                    }
                }
                Ok(AppendOutcome::Rejected) => {
                    let reason = inner.reject(&mut state);
                    inner.settle(&mut state);
                    Next::Stop(reason)
                }
                Err(err) => {
                    error!(
                        stream_id = ?inner.stream_id.get(),
                        start = batch.start,
                        end = batch.end,
                        error = %err,
                        "chunk write failed"
                    );
                    if matches!(state.phase, Phase::Open | Phase::Finishing) {
                        requeue(&mut state, batch.parts);
                    }
                    inner.settle(&mut state);
                    Next::Stop(None)
                }
            }
        };

        match next {
            Next::Continue => {}
            Next::Stop(reason) => {
                inner.notify_abort(reason);
                return;
            }
        }
    }
}

/// Persists the parts of one generation step as cursor-addressed chunks.
///
/// The stream record is created on the first flush, so a step that emits
/// nothing leaves no trace. Parts are batched: a flush starts only when none
/// is in flight and the throttle interval has elapsed since the previous one.
/// Clones share the same writer.
///
/// `add_parts` spawns flushes onto the current Tokio runtime.
#[derive(Clone)]
pub struct DeltaWriter {
    inner: Arc<WriterInner>,
}

impl DeltaWriter {
    pub fn builder(store: Arc<dyn StreamStore>, stream: NewStream) -> DeltaWriterBuilder {
        DeltaWriterBuilder {
            store,
            stream,
            options: StreamingOptions::default(),
            on_abort: None,
            abort_signal: None,
        }
    }

    /// Id of the stream once the first flush created it.
    pub fn stream_id(&self) -> Option<StreamId> {
        self.inner.stream_id.get().cloned()
    }

    /// Cursor after the last persisted chunk.
    pub fn cursor(&self) -> u64 {
        self.inner.lock_state().cursor
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.inner.lock_state().phase, Phase::Aborted { .. })
    }

    /// Buffers parts and starts a flush if none is running and the throttle
    /// interval has elapsed. Never waits on the store; a no-op once the
    /// writer is finishing or aborted.
    pub fn add_parts(&self, parts: impl IntoIterator<Item = Part>) {
        let spawn = {
            let mut state = self.inner.lock_state();
            if state.phase != Phase::Open {
                debug!(stream_id = ?self.inner.stream_id.get(), phase = ?state.phase, "parts ignored");
                return;
            }
            state.buffer.extend(parts);
            if state.buffer.is_empty() || state.flushing || !self.inner.throttle_elapsed(&state) {
                false
            } else {
                self.inner.begin_flush(&mut state);
                true
            }
        };
        if spawn {
            tokio::spawn(flush_chain(self.inner.clone()));
        }
    }

    /// Resolves once no flush is in flight.
    pub async fn wait_idle(&self) {
        self.inner.wait_idle().await;
    }

    /// Resolves once the writer has finished or aborted.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Waits for the in-flight flush, writes whatever is still buffered and
    /// marks the stream finished.
    ///
    /// Returns `Aborted` if a write was rejected. On a store error the writer
    /// stays open so the caller can retry or fail it.
    pub async fn finish(&self) -> Result<(), WriterError> {
        {
            let mut state = self.inner.lock_state();
            match &state.phase {
                Phase::Open => state.phase = Phase::Finishing,
                Phase::Finishing | Phase::Finished => return Ok(()),
                Phase::Aborted { reason } => return Err(WriterError::aborted(reason.clone())),
            }
        }
        self.inner.wait_idle().await;

        let batch = {
            let mut state = self.inner.lock_state();
            if let Phase::Aborted { reason } = &state.phase {
                return Err(WriterError::aborted(reason.clone()));
            }
            if state.buffer.is_empty() {
                None
            } else {
                self.inner.begin_flush(&mut state);
                Some(self.inner.take_batch(&mut state))
            }
        };

        if let Some(batch) = batch {
            let outcome = self.inner.write(&batch).await;
            let rejected = {
                let mut state = self.inner.lock_state();
                self.inner.settle(&mut state);
                match outcome {
                    Ok(AppendOutcome::Appended) => {
                        state.cursor = batch.end;
                        None
                    }
                    Ok(AppendOutcome::Rejected) => self.inner.reject(&mut state),
                    Err(err) => {
                        requeue(&mut state, batch.parts);
                        state.phase = Phase::Open;
                        return Err(err.into());
                    }
                }
            };
            if rejected.is_some() {
                self.inner.notify_abort(rejected);
                return Err(WriterError::aborted(REJECTED_REASON));
            }
        }

        if let Some(stream_id) = self.inner.stream_id.get()
            && let Err(err) = self.inner.store.mark_finished(stream_id).await
        {
            self.inner.lock_state().phase = Phase::Open;
            return Err(err.into());
        }

        self.inner.lock_state().phase = Phase::Finished;
        self.inner.closed.send_replace(true);
        debug!(stream_id = ?self.inner.stream_id.get(), "writer finished");
        Ok(())
    }

    /// Stops the writer: drops buffered parts, waits for the in-flight flush
    /// and marks the stream aborted with `reason`.
    ///
    /// A no-op if the writer is already finishing, finished or aborted.
    pub async fn fail(&self, reason: impl Into<String>) -> Result<(), WriterError> {
        let reason = reason.into();
        {
            let mut state = self.inner.lock_state();
            if state.phase != Phase::Open {
                return Ok(());
            }
            state.phase = Phase::Aborted {
                reason: reason.clone(),
            };
            state.buffer.clear();
        }
        self.inner.wait_idle().await;

        let result = match self.inner.stream_id.get() {
            Some(stream_id) => self
                .inner
                .store
                .mark_aborted(stream_id, &reason)
                .await
                .map(|_| ())
                .map_err(WriterError::from),
            None => Ok(()),
        };
        self.inner.closed.send_replace(true);
        debug!(stream_id = ?self.inner.stream_id.get(), reason = %reason, "writer aborted");
        result
    }
}

/// Configures a [`DeltaWriter`].
pub struct DeltaWriterBuilder {
    store: Arc<dyn StreamStore>,
    stream: NewStream,
    options: StreamingOptions,
    on_abort: Option<AbortCallback>,
    abort_signal: Option<watch::Receiver<bool>>,
}

impl DeltaWriterBuilder {
    pub fn options(mut self, options: StreamingOptions) -> Self {
        self.options = options;
        self
    }

    /// Called when the store rejects an append, so the producer can stop.
    pub fn on_abort(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_abort = Some(Arc::new(callback));
        self
    }

    /// Fails the writer once the signal turns `true`.
    pub fn abort_signal(mut self, signal: watch::Receiver<bool>) -> Self {
        self.abort_signal = Some(signal);
        self
    }

    /// Builds the writer. With an abort signal set this must run inside a
    /// Tokio runtime.
    pub fn build(self) -> DeltaWriter {
        let (idle, _) = watch::channel(true);
        let (closed, _) = watch::channel(false);
        let writer = DeltaWriter {
            inner: Arc::new(WriterInner {
                store: self.store,
                new_stream: self.stream,
                options: self.options,
                stream_id: OnceCell::new(),
                state: Mutex::new(WriterState {
                    phase: Phase::Open,
                    buffer: Vec::new(),
                    cursor: 0,
                    last_flush: None,
                    flushing: false,
                }),
                idle,
                closed,
                on_abort: self.on_abort,
            }),
        };
        if let Some(signal) = self.abort_signal {
            tokio::spawn(watch_abort_signal(
                Arc::downgrade(&writer.inner),
                writer.inner.closed.subscribe(),
                signal,
            ));
        }
        writer
    }
}

/// Holds the writer weakly: dropping every handle closes `closed` and ends
/// the task.
async fn watch_abort_signal(
    inner: Weak<WriterInner>,
    mut closed: watch::Receiver<bool>,
    mut signal: watch::Receiver<bool>,
) {
    let fired = tokio::select! {
        result = signal.wait_for(|aborted| *aborted) => result.is_ok(),
        _ = closed.wait_for(|closed| *closed) => false,
    };
    let Some(inner) = inner.upgrade().filter(|_| fired) else {
        return;
    };
    if let Err(err) = (DeltaWriter { inner }).fail(SIGNAL_REASON).await {
        error!(error = %err, "abort write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use threadstream_core::{
        MessageDoc, StreamCursor, StreamMessage, StreamStatus, ThreadId, apply_deltas,
    };

    use crate::memory::MemoryStore;
    use crate::store::{MessagePage, PageOptions, StreamListQuery};

    /// Delegates to a memory store, delaying appends and counting them.
    /// The first `failures` appends error out after the delay.
    #[derive(Clone, Default)]
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
        appends: Arc<AtomicUsize>,
        failures: usize,
    }

    #[async_trait::async_trait]
    impl StreamStore for SlowStore {
        async fn create_stream(&self, stream: NewStream) -> Result<StreamId, StoreError> {
            self.inner.create_stream(stream).await
        }

        async fn append_delta(&self, delta: StreamDelta) -> Result<AppendOutcome, StoreError> {
            let attempt = self.appends.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if attempt < self.failures {
                return Err(StoreError::backend("connection reset"));
            }
            self.inner.append_delta(delta).await
        }

        async fn mark_finished(&self, stream_id: &StreamId) -> Result<(), StoreError> {
            self.inner.mark_finished(stream_id).await
        }

        async fn mark_aborted(&self, stream_id: &StreamId, reason: &str) -> Result<bool, StoreError> {
            self.inner.mark_aborted(stream_id, reason).await
        }

        async fn abort_by_order(
            &self,
            thread_id: &ThreadId,
            order: u64,
            reason: &str,
        ) -> Result<bool, StoreError> {
            self.inner.abort_by_order(thread_id, order, reason).await
        }

        async fn list_active_streams(
            &self,
            query: &StreamListQuery,
        ) -> Result<Vec<StreamMessage>, StoreError> {
            self.inner.list_active_streams(query).await
        }

        async fn fetch_deltas(
            &self,
            thread_id: &ThreadId,
            cursors: &[StreamCursor],
        ) -> Result<Vec<StreamDelta>, StoreError> {
            self.inner.fetch_deltas(thread_id, cursors).await
        }

        async fn fetch_finalized_messages(
            &self,
            thread_id: &ThreadId,
            page: &PageOptions,
        ) -> Result<MessagePage, StoreError> {
            self.inner.fetch_finalized_messages(thread_id, page).await
        }
    }

    fn new_writer(store: Arc<dyn StreamStore>) -> DeltaWriter {
        DeltaWriter::builder(store, NewStream::new("t1", 1, 0)).build()
    }

    fn text(value: &str) -> Part {
        Part::text_delta(value)
    }

    fn stream_id(writer: &DeltaWriter) -> StreamId {
        writer.stream_id().expect("stream created")
    }

    #[tokio::test(start_paused = true)]
    async fn parts_within_throttle_window_are_batched() {
        let store = MemoryStore::new();
        let writer = new_writer(Arc::new(store.clone()));

        writer.add_parts([text("a")]);
        writer.wait_idle().await;
        let id = stream_id(&writer);
        assert_eq!(store.deltas(&id).len(), 1);

        writer.add_parts([text("b")]);
        writer.add_parts([text("c")]);
        writer.wait_idle().await;
        assert_eq!(store.deltas(&id).len(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        writer.add_parts([text("d")]);
        writer.wait_idle().await;

        let deltas = store.deltas(&id);
        assert_eq!(deltas.len(), 2);
        assert_eq!((deltas[1].start, deltas[1].end), (1, 4));
        assert_eq!(deltas[1].parts, vec![text("bcd")]);
        assert_eq!(writer.cursor(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn catch_up_flush_runs_when_throttle_elapsed_during_write() {
        let store = SlowStore {
            delay: Duration::from_millis(300),
            ..SlowStore::default()
        };
        let writer = new_writer(Arc::new(store.clone()));

        writer.add_parts([text("a")]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.add_parts([text("b")]);
        writer.wait_idle().await;

        let deltas = store.inner.deltas(&stream_id(&writer));
        let ranges: Vec<_> = deltas.iter().map(|d| (d.start, d.end)).collect();
        assert_eq!(ranges, vec![(0, 1), (1, 2)]);
        assert_eq!(store.appends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_without_parts_creates_nothing() {
        let store = MemoryStore::new();
        let writer = new_writer(Arc::new(store.clone()));
        writer.finish().await.unwrap();
        assert_eq!(store.stream_count(), 0);
        assert!(writer.stream_id().is_none());
        writer.add_parts([text("late")]);
        writer.wait_idle().await;
        assert_eq!(store.stream_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_flushes_buffer_then_marks_finished() {
        let store = MemoryStore::new();
        let writer = new_writer(Arc::new(store.clone()));
        writer.add_parts([text("Hello")]);
        writer.wait_idle().await;
        writer.add_parts([text(" World!")]);
        writer.finish().await.unwrap();
        writer.finish().await.unwrap();

        let id = stream_id(&writer);
        assert_eq!(store.stream(&id).map(|s| s.status), Some(StreamStatus::Finished));
        let deltas = store.deltas(&id);
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().all(|d| !d.parts.is_empty()));
        assert_eq!(store.stream_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_rewrites_batch_lost_by_in_flight_flush() {
        let store = SlowStore {
            delay: Duration::from_millis(100),
            failures: 1,
            ..SlowStore::default()
        };
        let writer = new_writer(Arc::new(store.clone()));
        writer.add_parts([text("Hello")]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        writer.add_parts([text(" World!")]);
        writer.finish().await.unwrap();

        let id = stream_id(&writer);
        assert_eq!(store.inner.stream(&id).map(|s| s.status), Some(StreamStatus::Finished));
        let deltas = store.inner.deltas(&id);
        let ranges: Vec<_> = deltas.iter().map(|d| (d.start, d.end)).collect();
        assert_eq!(ranges, vec![(0, 2)]);
        assert_eq!(deltas[0].parts, vec![text("Hello World!")]);
        assert_eq!(store.appends.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_append_aborts_without_retry() {
        let store = SlowStore::default();
        let aborts = Arc::new(AtomicUsize::new(0));
        let seen = aborts.clone();
        let writer = DeltaWriter::builder(Arc::new(store.clone()), NewStream::new("t1", 1, 0))
            .on_abort(move |reason| {
                assert_eq!(reason, REJECTED_REASON);
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        writer.add_parts([text("a")]);
        writer.wait_idle().await;
        let id = stream_id(&writer);
        assert!(store.inner.mark_aborted(&id, "stopped elsewhere").await.unwrap());

        tokio::time::advance(Duration::from_millis(250)).await;
        writer.add_parts([text("b")]);
        writer.wait_idle().await;
        assert!(writer.is_aborted());
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert_eq!(store.appends.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_millis(250)).await;
        writer.add_parts([text("c")]);
        writer.wait_idle().await;
        assert_eq!(store.appends.load(Ordering::SeqCst), 2);
        assert_eq!(
            writer.finish().await,
            Err(WriterError::aborted(REJECTED_REASON))
        );
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.abort_reason(&id).as_deref(), Some("stopped elsewhere"));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_waits_for_in_flight_flush() {
        let store = SlowStore {
            delay: Duration::from_millis(100),
            ..SlowStore::default()
        };
        let writer = new_writer(Arc::new(store.clone()));
        writer.add_parts([text("partial")]);
        tokio::time::sleep(Duration::from_millis(10)).await;

        writer.fail("user stop").await.unwrap();
        let id = stream_id(&writer);
        assert_eq!(store.inner.deltas(&id).len(), 1);
        assert_eq!(store.inner.stream(&id).map(|s| s.status), Some(StreamStatus::Aborted));
        assert_eq!(store.inner.abort_reason(&id).as_deref(), Some("user stop"));

        writer.fail("again").await.unwrap();
        assert_eq!(store.inner.abort_reason(&id).as_deref(), Some("user stop"));
        assert_eq!(writer.finish().await, Err(WriterError::aborted("user stop")));
    }

    #[tokio::test(start_paused = true)]
    async fn finish_wins_over_later_fail() {
        let store = MemoryStore::new();
        let writer = new_writer(Arc::new(store.clone()));
        writer.add_parts([text("done")]);
        writer.finish().await.unwrap();
        writer.fail("too late").await.unwrap();
        let id = stream_id(&writer);
        assert_eq!(store.stream(&id).map(|s| s.status), Some(StreamStatus::Finished));
        assert!(store.abort_reason(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_signal_fails_the_writer() {
        let store = MemoryStore::new();
        let (abort_tx, abort_rx) = watch::channel(false);
        let writer = DeltaWriter::builder(Arc::new(store.clone()), NewStream::new("t1", 1, 0))
            .abort_signal(abort_rx)
            .build();
        writer.add_parts([text("a")]);
        writer.wait_idle().await;

        abort_tx.send(true).unwrap();
        writer.closed().await;
        let id = stream_id(&writer);
        assert!(writer.is_aborted());
        assert_eq!(store.abort_reason(&id).as_deref(), Some(SIGNAL_REASON));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_writer_releases_signal_watcher() {
        let store = MemoryStore::new();
        let (abort_tx, abort_rx) = watch::channel(false);
        let writer = DeltaWriter::builder(Arc::new(store.clone()), NewStream::new("t1", 1, 0))
            .abort_signal(abort_rx)
            .build();
        let weak = Arc::downgrade(&writer.inner);
        writer.add_parts([text("a")]);
        writer.wait_idle().await;
        drop(writer);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(weak.upgrade().is_none());
        assert_eq!(abort_tx.receiver_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_tile_cursor_space_and_fold_back() {
        let store = MemoryStore::new();
        let writer = new_writer(Arc::new(store.clone()));
        let words = ["The ", "quick ", "brown ", "fox ", "jumps"];
        for (index, word) in words.iter().enumerate() {
            writer.add_parts([text(word)]);
            if index % 2 == 1 {
                writer.add_parts([Part::reasoning_delta("hm")]);
            }
            writer.wait_idle().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        writer.finish().await.unwrap();

        let id = stream_id(&writer);
        let deltas = store.deltas(&id);
        let mut next = 0;
        for delta in &deltas {
            assert_eq!(delta.start, next);
            next = delta.end;
        }
        assert_eq!(next, 7);

        let stream = store.stream(&id).unwrap();
        let (state, changed) = apply_deltas(&ThreadId::new("t1"), &stream, None, &deltas);
        assert!(changed);
        let messages: &[MessageDoc] = &state.messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text.as_deref(), Some("The quick brown fox jumps"));
        assert_eq!(messages[0].reasoning.as_deref(), Some("hmhm"));
    }
}
