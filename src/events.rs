//! Outbound lifecycle event stream.
//!
//! The core emits record lifecycle events on a broadcast channel so that
//! collaborators outside the core (logging, sitemap generation, cache
//! warming) can observe it without being wired into the service itself.
//! Senders never block: if no subscriber is attached the events are dropped.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

/// Lifecycle events observable by external collaborators.
#[derive(Clone, Debug)]
pub enum RecordEvent {
    Created {
        code: String,
        expires_at: DateTime<Utc>,
    },
    Expired {
        code: String,
    },
    Purged {
        code: String,
        bytes_reclaimed: u64,
    },
}

pub type EventSender = broadcast::Sender<RecordEvent>;

const CHANNEL_CAPACITY: usize = 256;

pub fn channel() -> (EventSender, broadcast::Receiver<RecordEvent>) {
    broadcast::channel(CHANNEL_CAPACITY)
}

/// Spawn a subscriber that logs every lifecycle event.
pub fn spawn_logger(
    mut rx: broadcast::Receiver<RecordEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(RecordEvent::Created { code, expires_at }) => {
                    tracing::info!(code, %expires_at, "record created");
                }
                Ok(RecordEvent::Expired { code }) => {
                    tracing::info!(code, "record expired");
                }
                Ok(RecordEvent::Purged {
                    code,
                    bytes_reclaimed,
                }) => {
                    tracing::info!(code, bytes_reclaimed, "record purged");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event logger lagged behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
