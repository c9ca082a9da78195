//! Write path and reader driver for streamed thread output.
//!
//! A [`DeltaWriter`] persists one generation step's parts as throttled,
//! cursor-addressed chunks through a [`StreamStore`]. A [`ThreadFeed`] reads
//! them back, folds them and merges them with finalized messages.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use threadstream_core::{NewStream, Part};
//! use threadstream_writer::{DeltaWriter, FeedState, MemoryStore, ThreadFeed, WriterError};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), WriterError> {
//! let store = Arc::new(MemoryStore::new());
//! let writer = DeltaWriter::builder(store.clone(), NewStream::new("thread-1", 1, 1)).build();
//! writer.add_parts([Part::text_delta("Hello")]);
//!
//! let feed = ThreadFeed::new(store, "thread-1");
//! let snapshot = feed.sync(&FeedState::default()).await?;
//! println!("{} turns", snapshot.turns().len());
//!
//! writer.finish().await?;
//! # Ok(())
//! # }
//! ```

/// Environment loading and tuning options.
pub mod config;
/// Store and writer error types.
pub mod errors;
/// Reader-side sync driver.
pub mod feed;
/// In-memory store.
pub mod memory;
/// Persistence contract.
pub mod store;
/// Throttled chunk writer.
pub mod writer;

pub use config::{FeedOptions, StreamingOptions};
pub use errors::{StoreError, WriterError};
pub use feed::{FeedSnapshot, FeedState, ThreadFeed};
pub use memory::MemoryStore;
pub use store::{AppendOutcome, MessagePage, PageOptions, StreamListQuery, StreamStore};
pub use writer::{AbortCallback, DeltaWriter, DeltaWriterBuilder};
