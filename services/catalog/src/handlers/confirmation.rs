use crate::handlers::NotifyOutcome;
use crate::mailer::{Mailer, Notice};
use crate::model::{ChangeEvent, ChangeKind};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Mails an upload confirmation for every newly cataloged image.
///
/// Driven by the catalog change feed. Updates and deletions produce no mail.
pub struct ChangeNotifier {
    mailer: Arc<dyn Mailer>,
}

impl ChangeNotifier {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// React to a single committed change
    pub async fn handle_change(&self, change: &ChangeEvent) -> NotifyOutcome {
        if change.kind != ChangeKind::Insert {
            debug!(id = %change.id, kind = ?change.kind, "Ignoring catalog change");
            return NotifyOutcome::Ignored;
        }

        match self.mailer.send(&Notice::confirmation(&change.id)).await {
            Ok(()) => {
                info!(id = %change.id, "Upload confirmation sent");
                metrics::counter!("notifications.sent", "kind" => "confirmation").increment(1);
                NotifyOutcome::Sent
            }
            Err(e) => {
                error!(id = %change.id, error = %e, "Failed to send upload confirmation");
                metrics::counter!("notifications.failed", "kind" => "confirmation").increment(1);
                NotifyOutcome::Failed
            }
        }
    }

    /// Consume change events until shutdown or until the feed closes
    pub async fn run(
        &self,
        mut changes: broadcast::Receiver<ChangeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Change notifier started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Change notifier received shutdown signal");
                    break;
                }
                received = changes.recv() => match received {
                    Ok(change) => {
                        self.handle_change(&change).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change notifier fell behind the change feed");
                        metrics::counter!("notifications.changes_lagged").increment(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Change feed closed");
                        break;
                    }
                },
            }
        }

        info!("Change notifier stopped");
    }
}
