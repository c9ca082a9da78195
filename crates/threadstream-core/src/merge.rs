//! Combining finalized messages with live stream reconstructions.

use tracing::debug;

use crate::fold::{FoldState, apply_deltas};
use crate::message::{MessageDoc, MessageStatus};
use crate::model::{Positioned, ThreadId, sorted};
use crate::stream::{StreamCursor, StreamDelta, StreamMessage};

/// Result of folding every active stream of a thread.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedStreams {
    /// Live messages of all streams, sorted by position.
    pub messages: Vec<MessageDoc>,
    /// Fold state per active stream, to be handed back on the next call.
    pub states: Vec<FoldState>,
    pub changed: bool,
}

/// Folds `deltas` into the prior states of the currently active `streams`.
///
/// States of streams that are no longer listed are dropped, which itself
/// counts as a change.
pub fn merge_streams(
    thread_id: &ThreadId,
    streams: &[StreamMessage],
    existing: &[FoldState],
    deltas: &[StreamDelta],
) -> MergedStreams {
    let mut changed = false;
    let mut states = Vec::with_capacity(streams.len());
    for stream in streams {
        let own: Vec<StreamDelta> = deltas
            .iter()
            .filter(|delta| delta.stream_id == stream.stream_id)
            .cloned()
            .collect();
        let prior = existing
            .iter()
            .find(|state| state.stream_id == stream.stream_id);
        let (state, stream_changed) = apply_deltas(thread_id, stream, prior, &own);
        changed |= stream_changed;
        states.push(state);
    }

    for state in existing {
        if !streams.iter().any(|s| s.stream_id == state.stream_id) {
            debug!(stream_id = %state.stream_id, "stream no longer active");
            changed = true;
        }
    }

    let live: Vec<MessageDoc> = states
        .iter()
        .flat_map(|state| state.messages.iter().cloned())
        .collect();
    MergedStreams {
        messages: sorted(&live),
        states,
        changed,
    }
}

/// Cursors to fetch next: the cached cursor for tracked streams, 0 for new
/// ones.
pub fn next_cursors(streams: &[StreamMessage], existing: &[FoldState]) -> Vec<StreamCursor> {
    streams
        .iter()
        .map(|stream| StreamCursor {
            stream_id: stream.stream_id.clone(),
            cursor: existing
                .iter()
                .find(|state| state.stream_id == stream.stream_id)
                .map_or(0, |state| state.cursor),
        })
        .collect()
}

fn finality(message: &MessageDoc) -> u8 {
    if message.streaming || message.status == MessageStatus::Pending {
        0
    } else {
        1
    }
}

/// Merges finalized messages with live ones into one feed ordered by
/// `(order, step_order)`.
///
/// On a position collision the more final entry wins; between equally final
/// entries the later one (live after finalized) wins. A just-committed
/// message therefore replaces its in-flight shadow.
pub fn combine_feed(finalized: &[MessageDoc], live: &[MessageDoc]) -> Vec<MessageDoc> {
    let mut all: Vec<MessageDoc> = finalized.iter().chain(live).cloned().collect();
    all.sort_by_key(Positioned::position);

    let mut feed: Vec<MessageDoc> = Vec::with_capacity(all.len());
    for message in all {
        match feed.last_mut() {
            Some(last) if last.position() == message.position() => {
                if finality(&message) >= finality(last) {
                    *last = message;
                }
            }
            _ => feed.push(message),
        }
    }
    feed
}

/// Order from which live streams should be listed for a page of finalized
/// messages (ascending).
///
/// The newest finalized message still pending marks a turn whose steps may
/// be streaming; it is rounded down to a multiple of 10 so neighbouring
/// readers share the same listing.
pub fn stream_start_order(finalized: &[MessageDoc]) -> u64 {
    finalized
        .iter()
        .rev()
        .find(|message| !message.streaming && message.status == MessageStatus::Pending)
        .map(|message| message.order - message.order % 10)
        .or_else(|| finalized.last().map(|message| message.order))
        .unwrap_or(0)
}
