//! Reader side: one sync round over a thread's finalized and live messages.

use std::sync::Arc;

use threadstream_core::{
    FoldState, MessageDoc, ThreadId, UiMessage, combine_feed, merge_streams, next_cursors,
    stream_start_order, to_ui_messages,
};
use tracing::debug;

use crate::config::FeedOptions;
use crate::errors::StoreError;
use crate::store::{PageOptions, StreamListQuery, StreamStore};

/// Reader state carried between sync rounds. Owned by the caller.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeedState {
    pub finalized: Vec<MessageDoc>,
    pub streams: Vec<FoldState>,
}

/// Output of one sync round.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedSnapshot {
    /// Finalized and live messages ordered by position.
    pub messages: Vec<MessageDoc>,
    /// State to pass to the next round.
    pub state: FeedState,
    /// Hint that `messages` differ from the previous round.
    pub changed: bool,
}

impl FeedSnapshot {
    pub fn turns(&self) -> Vec<UiMessage> {
        to_ui_messages(&self.messages)
    }
}

/// Polls a store for one thread.
#[derive(Clone)]
pub struct ThreadFeed {
    store: Arc<dyn StreamStore>,
    thread_id: ThreadId,
    options: FeedOptions,
}

impl ThreadFeed {
    pub fn new(store: Arc<dyn StreamStore>, thread_id: impl Into<ThreadId>) -> Self {
        Self {
            store,
            thread_id: thread_id.into(),
            options: FeedOptions::default(),
        }
    }

    pub fn options(mut self, options: FeedOptions) -> Self {
        self.options = options;
        self
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Loads the newest finalized page, lists live streams from the page's
    /// start order, fetches their chunks past the cached cursors and merges
    /// everything.
    pub async fn sync(&self, prior: &FeedState) -> Result<FeedSnapshot, StoreError> {
        let page = self
            .store
            .fetch_finalized_messages(&self.thread_id, &PageOptions::first(self.options.page_size))
            .await?;

        let query = StreamListQuery::new(self.thread_id.clone())
            .start_order(stream_start_order(&page.messages))
            .include_statuses(self.options.include_statuses.clone());
        let streams = self.store.list_active_streams(&query).await?;

        let cursors = next_cursors(&streams, &prior.streams);
        let deltas = if cursors.is_empty() {
            Vec::new()
        } else {
            self.store.fetch_deltas(&self.thread_id, &cursors).await?
        };
        let merged = merge_streams(&self.thread_id, &streams, &prior.streams, &deltas);

        let finalized_changed = page.messages != prior.finalized;
        let changed = merged.changed || finalized_changed;
        debug!(
            thread_id = %self.thread_id,
            finalized = page.messages.len(),
            streams = streams.len(),
            deltas = deltas.len(),
            changed,
            "feed synced"
        );

        Ok(FeedSnapshot {
            messages: combine_feed(&page.messages, &merged.messages),
            state: FeedState {
                finalized: page.messages,
                streams: merged.states,
            },
            changed,
        })
    }
}
