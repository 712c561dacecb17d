//! Sender side of the queue.
//!
//! A sender drains the queue with [`run_fetch_loop`], one loop per delivery
//! medium. Delivery is at-most-once per fetch: an event whose send fails is
//! counted and logged but not requeued.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_metrics::NotifierMetrics;

use crate::error::Result;
use crate::queue::NotificationQueue;
use crate::types::NotificationEvent;

/// Pause after a failed fetch before polling again.
pub const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Future returned by [`NotificationSender::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Delivers notification events over one medium.
pub trait NotificationSender: Send + Sync + fmt::Debug {
    /// Returns the name of this sender.
    fn name(&self) -> &str;

    /// Delivers one event.
    ///
    /// Implementations return `EventError::SendFailed` when delivery fails.
    fn send<'a>(&'a self, event: &'a NotificationEvent) -> SendFuture<'a>;
}

/// Sender that writes events to the log.
#[derive(Debug, Clone, Default)]
pub struct LogSender;

impl NotificationSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    fn send<'a>(&'a self, event: &'a NotificationEvent) -> SendFuture<'a> {
        Box::pin(async move {
            info!(
                trigger_id = %event.trigger_id,
                metric = %event.metric,
                old_state = %event.old_state,
                state = %event.state,
                value = ?event.value,
                timestamp = event.timestamp,
                subscription_id = ?event.subscription_id,
                contact_id = ?event.contact_id,
                "notification"
            );
            Ok(())
        })
    }
}

/// Fetches events and hands them to `sender` until `cancel` fires.
///
/// An empty poll is retried at once. Fetch errors are logged and followed
/// by [`FETCH_ERROR_BACKOFF`]. Returns the number of delivered events.
pub async fn run_fetch_loop(
    queue: NotificationQueue,
    sender: Arc<dyn NotificationSender>,
    metrics: NotifierMetrics,
    cancel: CancellationToken,
) -> u64 {
    info!(sender = sender.name(), "fetch loop started");
    let mut delivered = 0u64;

    loop {
        let fetched = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            fetched = queue.fetch() => fetched,
        };

        match fetched {
            Ok(Some(event)) => {
                metrics.inc_events_fetched();
                match sender.send(&event).await {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        metrics.inc_send_failures();
                        warn!(
                            sender = sender.name(),
                            trigger_id = %event.trigger_id,
                            error = %e,
                            "failed to deliver notification"
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                if e.is_decode() {
                    error!(sender = sender.name(), error = %e, "dropping corrupt notification record");
                } else {
                    warn!(sender = sender.name(), error = %e, "failed to fetch notification");
                }

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(FETCH_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    debug!(sender = sender.name(), delivered, "fetch loop stopped");
    delivered
}
