//! In-process [`StreamStore`] backed by concurrent maps.

use std::sync::Arc;

use dashmap::DashMap;
use threadstream_core::{
    MessageDoc, MessageStatus, NewStream, Positioned, StreamCursor, StreamDelta, StreamId,
    StreamMessage, StreamStatus, ThreadId, sorted,
};
use tracing::{debug, warn};

use crate::errors::StoreError;
use crate::store::{AppendOutcome, MessagePage, PageOptions, StreamListQuery, StreamStore};

#[derive(Clone, Debug)]
struct StreamRecord {
    stream: StreamMessage,
    deltas: Vec<StreamDelta>,
    abort_reason: Option<String>,
}

impl StreamRecord {
    fn next_cursor(&self) -> u64 {
        self.deltas.last().map_or(0, |delta| delta.end)
    }
}

/// Shared in-memory store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    streams: Arc<DashMap<StreamId, StreamRecord>>,
    messages: Arc<DashMap<ThreadId, Vec<MessageDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current descriptor of a stream.
    pub fn stream(&self, stream_id: &StreamId) -> Option<StreamMessage> {
        self.streams.get(stream_id).map(|record| record.stream.clone())
    }

    /// Every chunk stored for a stream, in cursor order.
    pub fn deltas(&self, stream_id: &StreamId) -> Vec<StreamDelta> {
        self.streams
            .get(stream_id)
            .map(|record| record.deltas.clone())
            .unwrap_or_default()
    }

    pub fn abort_reason(&self, stream_id: &StreamId) -> Option<String> {
        self.streams
            .get(stream_id)
            .and_then(|record| record.abort_reason.clone())
    }

    /// Number of stream records, including finished and aborted ones.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Commits finalized messages.
    ///
    /// A message may replace a stored `pending` message at the same position;
    /// any other position collision is a `Conflict` and nothing is written.
    pub fn save_messages(&self, messages: Vec<MessageDoc>) -> Result<(), StoreError> {
        for (index, message) in messages.iter().enumerate() {
            if messages[..index]
                .iter()
                .any(|other| other.thread_id == message.thread_id && other.position() == message.position())
            {
                return Err(StoreError::conflict(format!(
                    "duplicate message at {} in batch",
                    message.key()
                )));
            }
            if let Some(existing) = self.messages.get(&message.thread_id)
                && existing.iter().any(|stored| {
                    stored.position() == message.position() && stored.status != MessageStatus::Pending
                })
            {
                return Err(StoreError::conflict(format!(
                    "message already committed at {}",
                    message.key()
                )));
            }
        }

        for message in messages {
            let mut thread = self.messages.entry(message.thread_id.clone()).or_default();
            thread.retain(|stored| stored.position() != message.position());
            thread.push(message);
            thread.sort_by_key(Positioned::position);
        }
        Ok(())
    }

    /// Drops a stream and its chunks once its messages are committed.
    pub fn finalize(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        match self.streams.remove(stream_id) {
            Some((_, record)) => {
                debug!(stream_id = %stream_id, chunks = record.deltas.len(), "stream finalized");
                Ok(())
            }
            None => Err(StoreError::stream_not_found(stream_id)),
        }
    }
}

#[async_trait::async_trait]
impl StreamStore for MemoryStore {
    async fn create_stream(&self, stream: NewStream) -> Result<StreamId, StoreError> {
        let stream_id = StreamId::new(uuid::Uuid::new_v4().to_string());
        let record = StreamRecord {
            stream: StreamMessage {
                stream_id: stream_id.clone(),
                thread_id: stream.thread_id,
                order: stream.order,
                step_order: stream.step_order,
                status: StreamStatus::Streaming,
                metadata: stream.metadata,
                created_at: chrono::Utc::now(),
            },
            deltas: Vec::new(),
            abort_reason: None,
        };
        self.streams.insert(stream_id.clone(), record);
        Ok(stream_id)
    }

    async fn append_delta(&self, delta: StreamDelta) -> Result<AppendOutcome, StoreError> {
        let mut record = self
            .streams
            .get_mut(&delta.stream_id)
            .ok_or_else(|| StoreError::stream_not_found(&delta.stream_id))?;
        if record.stream.status != StreamStatus::Streaming {
            debug!(stream_id = %delta.stream_id, status = ?record.stream.status, "append rejected");
            return Ok(AppendOutcome::Rejected);
        }
        if delta.parts.is_empty() || delta.end <= delta.start {
            return Err(StoreError::conflict(format!(
                "empty chunk [{}, {})",
                delta.start, delta.end
            )));
        }
        let next = record.next_cursor();
        if delta.start != next {
            return Err(StoreError::conflict(format!(
                "chunk starts at {} but stream {} continues at {next}",
                delta.start, delta.stream_id
            )));
        }
        record.deltas.push(delta);
        Ok(AppendOutcome::Appended)
    }

    async fn mark_finished(&self, stream_id: &StreamId) -> Result<(), StoreError> {
        let mut record = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StoreError::stream_not_found(stream_id))?;
        if record.stream.status == StreamStatus::Streaming {
            record.stream.status = StreamStatus::Finished;
        } else {
            warn!(stream_id = %stream_id, status = ?record.stream.status, "finish on stream that is not streaming");
        }
        Ok(())
    }

    async fn mark_aborted(&self, stream_id: &StreamId, reason: &str) -> Result<bool, StoreError> {
        let Some(mut record) = self.streams.get_mut(stream_id) else {
            warn!(stream_id = %stream_id, "abort on unknown stream");
            return Ok(false);
        };
        if record.stream.status != StreamStatus::Streaming {
            return Ok(false);
        }
        record.stream.status = StreamStatus::Aborted;
        record.abort_reason = Some(reason.to_string());
        Ok(true)
    }

    async fn abort_by_order(
        &self,
        thread_id: &ThreadId,
        order: u64,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut aborted = false;
        for mut record in self.streams.iter_mut() {
            let stream = &mut record.stream;
            if stream.thread_id == *thread_id
                && stream.order == order
                && stream.status == StreamStatus::Streaming
            {
                stream.status = StreamStatus::Aborted;
                record.abort_reason = Some(reason.to_string());
                aborted = true;
            }
        }
        Ok(aborted)
    }

    async fn list_active_streams(
        &self,
        query: &StreamListQuery,
    ) -> Result<Vec<StreamMessage>, StoreError> {
        let streams: Vec<StreamMessage> = self
            .streams
            .iter()
            .filter(|record| query.matches(&record.stream))
            .map(|record| record.stream.clone())
            .collect();
        Ok(sorted(&streams))
    }

    async fn fetch_deltas(
        &self,
        thread_id: &ThreadId,
        cursors: &[StreamCursor],
    ) -> Result<Vec<StreamDelta>, StoreError> {
        let mut deltas = Vec::new();
        for request in cursors {
            let Some(record) = self.streams.get(&request.stream_id) else {
                continue;
            };
            if record.stream.thread_id != *thread_id {
                warn!(stream_id = %request.stream_id, "cursor for stream of another thread");
                continue;
            }
            deltas.extend(
                record
                    .deltas
                    .iter()
                    .filter(|delta| delta.start >= request.cursor)
                    .cloned(),
            );
        }
        Ok(deltas)
    }

    async fn fetch_finalized_messages(
        &self,
        thread_id: &ThreadId,
        page: &PageOptions,
    ) -> Result<MessagePage, StoreError> {
        let skip = match &page.cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| StoreError::backend(format!("invalid page cursor {cursor:?}")))?,
            None => 0,
        };
        let Some(thread) = self.messages.get(thread_id) else {
            return Ok(MessagePage {
                is_done: true,
                ..MessagePage::default()
            });
        };
        let end = thread.len().saturating_sub(skip);
        let start = end.saturating_sub(page.num_items);
        let is_done = start == 0;
        Ok(MessagePage {
            messages: thread[start..end].to_vec(),
            continue_cursor: (!is_done).then(|| (skip + end - start).to_string()),
            is_done,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadstream_core::{Content, Message, Part, Position, Role};

    fn chunk(stream_id: &StreamId, start: u64, end: u64) -> StreamDelta {
        StreamDelta {
            stream_id: stream_id.clone(),
            start,
            end,
            parts: vec![Part::text_delta("x")],
        }
    }

    fn message(order: u64, step: u64, status: MessageStatus) -> MessageDoc {
        MessageDoc::new(
            format!("m{order}-{step}"),
            ThreadId::new("t1"),
            Position::new(order, step),
            status,
            Message::new(Role::Assistant, Content::Text(format!("{order}.{step}"))),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn append_requires_contiguous_chunks() {
        let store = MemoryStore::new();
        let id = store.create_stream(NewStream::new("t1", 1, 0)).await.unwrap();
        assert_eq!(store.append_delta(chunk(&id, 0, 3)).await.unwrap(), AppendOutcome::Appended);
        assert!(matches!(
            store.append_delta(chunk(&id, 4, 5)).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.append_delta(chunk(&id, 3, 5)).await.unwrap(), AppendOutcome::Appended);
        assert_eq!(store.deltas(&id).len(), 2);
    }

    #[tokio::test]
    async fn append_to_aborted_stream_is_rejected() {
        let store = MemoryStore::new();
        let id = store.create_stream(NewStream::new("t1", 1, 0)).await.unwrap();
        assert!(store.mark_aborted(&id, "user stop").await.unwrap());
        assert!(!store.mark_aborted(&id, "again").await.unwrap());
        assert_eq!(store.append_delta(chunk(&id, 0, 1)).await.unwrap(), AppendOutcome::Rejected);
        assert_eq!(store.abort_reason(&id).as_deref(), Some("user stop"));
    }

    #[tokio::test]
    async fn abort_by_order_only_touches_that_turn() {
        let store = MemoryStore::new();
        let a = store.create_stream(NewStream::new("t1", 1, 0)).await.unwrap();
        let b = store.create_stream(NewStream::new("t1", 1, 1)).await.unwrap();
        let c = store.create_stream(NewStream::new("t1", 2, 0)).await.unwrap();
        assert!(store.abort_by_order(&ThreadId::new("t1"), 1, "stop").await.unwrap());
        assert!(!store.abort_by_order(&ThreadId::new("t1"), 1, "stop").await.unwrap());
        let status = |id: &StreamId| store.stream(id).map(|s| s.status);
        assert_eq!(status(&a), Some(StreamStatus::Aborted));
        assert_eq!(status(&b), Some(StreamStatus::Aborted));
        assert_eq!(status(&c), Some(StreamStatus::Streaming));
    }

    #[tokio::test]
    async fn listing_filters_by_order_and_status() {
        let store = MemoryStore::new();
        let old = store.create_stream(NewStream::new("t1", 1, 0)).await.unwrap();
        let done = store.create_stream(NewStream::new("t1", 3, 0)).await.unwrap();
        let live = store.create_stream(NewStream::new("t1", 2, 0)).await.unwrap();
        store.create_stream(NewStream::new("t2", 5, 0)).await.unwrap();
        store.mark_finished(&done).await.unwrap();

        let query = StreamListQuery::new("t1").start_order(2);
        let ids: Vec<_> = store
            .list_active_streams(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.stream_id)
            .collect();
        assert_eq!(ids, vec![live.clone()]);

        let query = StreamListQuery::new("t1")
            .include_statuses([StreamStatus::Streaming, StreamStatus::Finished]);
        let ids: Vec<_> = store
            .list_active_streams(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.stream_id)
            .collect();
        assert_eq!(ids, vec![old, live, done]);
    }

    #[tokio::test]
    async fn fetch_deltas_resumes_from_cursor() {
        let store = MemoryStore::new();
        let id = store.create_stream(NewStream::new("t1", 1, 0)).await.unwrap();
        store.append_delta(chunk(&id, 0, 2)).await.unwrap();
        store.append_delta(chunk(&id, 2, 4)).await.unwrap();
        let fetched = store
            .fetch_deltas(
                &ThreadId::new("t1"),
                &[StreamCursor { stream_id: id.clone(), cursor: 2 }],
            )
            .await
            .unwrap();
        assert_eq!(fetched, vec![chunk(&id, 2, 4)]);

        let other_thread = store
            .fetch_deltas(&ThreadId::new("t2"), &[StreamCursor { stream_id: id, cursor: 0 }])
            .await
            .unwrap();
        assert!(other_thread.is_empty());
    }

    #[tokio::test]
    async fn finalized_pages_walk_backwards_in_ascending_chunks() {
        let store = MemoryStore::new();
        store
            .save_messages((1..=5).map(|order| message(order, 0, MessageStatus::Success)).collect())
            .unwrap();
        let thread = ThreadId::new("t1");

        let first = store
            .fetch_finalized_messages(&thread, &PageOptions::first(2))
            .await
            .unwrap();
        let orders: Vec<_> = first.messages.iter().map(|m| m.order).collect();
        assert_eq!(orders, vec![4, 5]);
        assert!(!first.is_done);

        let second = store
            .fetch_finalized_messages(
                &thread,
                &PageOptions { cursor: first.continue_cursor, num_items: 2 },
            )
            .await
            .unwrap();
        let orders: Vec<_> = second.messages.iter().map(|m| m.order).collect();
        assert_eq!(orders, vec![2, 3]);

        let last = store
            .fetch_finalized_messages(
                &thread,
                &PageOptions { cursor: second.continue_cursor, num_items: 2 },
            )
            .await
            .unwrap();
        assert_eq!(last.messages.len(), 1);
        assert!(last.is_done);
        assert!(last.continue_cursor.is_none());
    }

    #[test]
    fn committed_positions_are_unique() {
        let store = MemoryStore::new();
        store.save_messages(vec![message(1, 0, MessageStatus::Pending)]).unwrap();
        store.save_messages(vec![message(1, 0, MessageStatus::Success)]).unwrap();
        assert!(matches!(
            store.save_messages(vec![message(1, 0, MessageStatus::Success)]),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            store.save_messages(vec![
                message(2, 0, MessageStatus::Success),
                message(2, 0, MessageStatus::Success),
            ]),
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn finalize_drops_stream_and_chunks() {
        let store = MemoryStore::new();
        let id = store.create_stream(NewStream::new("t1", 1, 0)).await.unwrap();
        store.append_delta(chunk(&id, 0, 1)).await.unwrap();
        store.mark_finished(&id).await.unwrap();
        store.finalize(&id).unwrap();
        assert!(store.stream(&id).is_none());
        assert!(matches!(store.finalize(&id), Err(StoreError::NotFound(_))));
    }
}
