//! Durable notification event queue for Vigil.
//!
//! `vigil-events` hands evaluated alert state from trigger checks to the
//! outbound senders. Every pushed [`NotificationEvent`] lands, in one atomic
//! step, on:
//!
//! - the global delivery queue that senders drain with a bounded-wait fetch
//! - the per-trigger history, ordered by event timestamp and pruned after 30 days
//! - optionally the UI feed, capped at the 101 most recent events
//!
//! A fetch removes the event from the queue, so an event fetched by a sender
//! that then crashes is gone.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_events::{EventStore, NotificationEvent, NotificationQueue, State};
//!
//! # tokio_test_block_on(async {
//! let queue = NotificationQueue::new(Arc::new(EventStore::in_memory()));
//!
//! let event = NotificationEvent::new("trigger-1", "servers.web-01.cpu", State::Error, State::Ok, 1_700_000_000);
//! queue.push(&event, true).unwrap();
//!
//! let fetched = queue.fetch().await.unwrap();
//! assert_eq!(fetched, Some(event));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/vigil-events/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod fetcher;
pub mod journal;
pub mod queue;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use error::{EventError, Result};
pub use fetcher::{FETCH_ERROR_BACKOFF, LogSender, NotificationSender, SendFuture, run_fetch_loop};
pub use queue::{
    DEFAULT_FETCH_TIMEOUT, DEFAULT_HISTORY_RETENTION, DEFAULT_UI_FEED_LEN, NotificationQueue, QueueConfig,
};
pub use store::{
    EventBackend, EventStore, EventStoreConfig, HistoryInsert, PopFuture, PushTransaction,
};
pub use types::{NotificationEvent, State};
