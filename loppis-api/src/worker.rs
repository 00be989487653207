use std::sync::Arc;

use loppis_order::{notification_for, NotificationRepository};
use loppis_shared::models::FulfillmentEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

/// Turns fulfillment events into persisted buyer notifications. Runs until the
/// sending side of the channel is dropped.
pub async fn start_notification_worker(
    mut rx: broadcast::Receiver<FulfillmentEvent>,
    repo: Arc<dyn NotificationRepository>,
) {
    info!("Notification worker started, listening to fulfillment events...");

    loop {
        match rx.recv().await {
            Ok(event) => {
                let notification = notification_for(&event);
                match repo.create_notification(&notification).await {
                    Ok(()) => info!(
                        "Notified {} about {} for order {}",
                        notification.user_id,
                        event.kind(),
                        event.order_id()
                    ),
                    Err(e) => error!(
                        "Failed to store {} notification for order {}: {}",
                        event.kind(),
                        event.order_id(),
                        e
                    ),
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Notification worker lagged, {} events dropped", skipped);
            }
            Err(RecvError::Closed) => {
                info!("Event channel closed, notification worker stopping");
                break;
            }
        }
    }
}
