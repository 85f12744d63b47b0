//! Presence publishers
//!
//! The daemon hands the latest resolved presence to a publisher through a
//! `watch` channel: only the newest value matters, so intermediate updates
//! may be skipped and a reconnect simply republishes the current one.

#[cfg(unix)]
pub mod discord;

use crate::error::Result;
use crate::resolver::Activity;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Delay between reconnect attempts
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// External presence slot
pub trait Publisher: Send {
    /// Open (or reopen) the underlying connection
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn set_activity(&mut self, activity: &Activity) -> impl Future<Output = Result<()>> + Send;

    fn clear_activity(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Resolves once the peer drops an established connection. Must be
    /// cancel safe: it is raced against presence changes.
    fn closed(&mut self) -> impl Future<Output = ()> + Send;

    /// Drop the connection; best effort
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

async fn publish<P: Publisher>(publisher: &mut P, presence: Option<&Activity>) -> Result<()> {
    match presence {
        Some(activity) => publisher.set_activity(activity).await,
        None => publisher.clear_activity().await,
    }
}

/// Wait out `retry`; true if `shutdown` fired first
async fn backoff<F>(retry: Duration, shutdown: &mut F) -> bool
where
    F: Future<Output = ()> + Unpin,
{
    tokio::select! {
        _ = shutdown => true,
        _ = tokio::time::sleep(retry) => false,
    }
}

/// Keep `publisher` in sync with `presence` until `shutdown` resolves.
///
/// Connection failures and peer disconnects are retried every `retry`, and
/// the current presence is republished after each reconnect. `connected`
/// mirrors the connection state for health reporting. On shutdown the
/// presence is cleared before the connection is closed.
pub async fn run<P, F>(
    mut publisher: P,
    mut presence: watch::Receiver<Option<Activity>>,
    connected: Arc<AtomicBool>,
    retry: Duration,
    shutdown: F,
) where
    P: Publisher,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        if !connected.load(Ordering::Relaxed) {
            let attempt = tokio::select! {
                _ = &mut shutdown => break,
                attempt = publisher.connect() => attempt,
            };
            match attempt {
                Ok(()) => {
                    info!("Connected to presence service");
                    connected.store(true, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!("Presence connection failed: {}", e);
                    if backoff(retry, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            }
        }

        let current = presence.borrow_and_update().clone();
        if let Err(e) = publish(&mut publisher, current.as_ref()).await {
            warn!("Disconnected from presence service: {}", e);
            connected.store(false, Ordering::Relaxed);
            publisher.close().await;
            if backoff(retry, &mut shutdown).await {
                break;
            }
            continue;
        }

        let lost = tokio::select! {
            _ = &mut shutdown => break,
            changed = presence.changed() => {
                if changed.is_err() {
                    break;
                }
                false
            }
            _ = publisher.closed() => true,
        };
        if lost {
            warn!("Presence service closed the connection");
            connected.store(false, Ordering::Relaxed);
            publisher.close().await;
            if backoff(retry, &mut shutdown).await {
                break;
            }
        }
    }

    if connected.swap(false, Ordering::Relaxed) {
        if let Err(e) = publisher.clear_activity().await {
            debug!("Failed to clear presence on shutdown: {}", e);
        }
        publisher.close().await;
    }
    debug!("presence publisher stopped");
}
