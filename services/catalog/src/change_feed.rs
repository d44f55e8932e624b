//! Catalog change feed.
//!
//! The `images` table notifies channel [`CHANGE_CHANNEL`] after every committed
//! insert, update and delete. [`PgChangeFeed`] listens on that channel and
//! rebroadcasts decoded [`ChangeEvent`]s in process, reconnecting whenever the
//! listener connection drops. Notifications sent while disconnected are lost.

use crate::model::ChangeEvent;
use sqlx::postgres::{PgListener, PgPool};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notification channel written by the catalog trigger
pub const CHANGE_CHANNEL: &str = "image_changes";

/// Capacity of the in-process change broadcast
const BROADCAST_CAPACITY: usize = 256;

/// Postgres LISTEN/NOTIFY change feed
pub struct PgChangeFeed {
    pool: PgPool,
    reconnect_delay: Duration,
    tx: broadcast::Sender<ChangeEvent>,
}

impl PgChangeFeed {
    pub fn new(pool: PgPool, reconnect_delay: Duration) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            pool,
            reconnect_delay,
            tx,
        }
    }

    /// Receive change events published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Listen until shutdown, reconnecting after connection failures
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(channel = CHANGE_CHANNEL, "Starting catalog change listener");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.listen() => {}
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!("Change listener shutting down");
    }

    /// One listener session; returns when the connection is lost
    async fn listen(&self) {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "PgListener connect failed, will retry");
                return;
            }
        };

        if let Err(e) = listener.listen(CHANGE_CHANNEL).await {
            warn!(error = %e, "LISTEN failed, will retry");
            return;
        }

        debug!(channel = CHANGE_CHANNEL, "Listening for catalog changes");

        loop {
            match listener.recv().await {
                Ok(notification) => self.forward(notification.payload()),
                Err(e) => {
                    warn!(error = %e, "Change listener connection lost, will reconnect");
                    metrics::counter!("catalog.change_feed.reconnects").increment(1);
                    return;
                }
            }
        }
    }

    fn forward(&self, payload: &str) {
        match ChangeEvent::from_payload(payload) {
            Ok(event) => {
                debug!(id = %event.id, kind = ?event.kind, "Catalog change received");
                // No subscribers is not an error
                let _ = self.tx.send(event);
            }
            Err(e) => warn!(error = %e, payload = %payload, "Ignoring malformed change payload"),
        }
    }
}
