use crate::coordinator::CoordinatorEvent;
use futures_util::StreamExt;
use redis::aio::PubSub;
use redmaster_core::message::INBOUND_KEYS;
use redmaster_core::metrics::METRICS;
use redmaster_core::{ControlMessage, Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Subscribes to the client control channels and feeds parsed messages into
/// the coordinator's event queue.
///
/// Reconnects with a short backoff when the bus connection drops. Malformed
/// payloads are logged and dropped; they never reach the coordinator.
pub struct BusListener {
    bus_url: String,
    events: mpsc::Sender<CoordinatorEvent>,
    cancel: CancellationToken,
}

impl BusListener {
    pub fn new(
        bus_url: impl Into<String>,
        events: mpsc::Sender<CoordinatorEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            bus_url: bus_url.into(),
            events,
            cancel,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let client = match redis::Client::open(self.bus_url.as_str()) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to create bus client: {}", e);
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
            };

            let pubsub = match client.get_async_pubsub().await {
                Ok(p) => p,
                Err(e) => {
                    tracing::error!("Failed to connect bus subscriber: {}", e);
                    if !self.backoff().await {
                        break;
                    }
                    continue;
                }
            };

            match self.listen(pubsub).await {
                Ok(()) => break,
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!("Bus subscriber error, reconnecting: {}", e);
                    if !self.backoff().await {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Bus listener shutting down");
    }

    async fn listen(&self, mut pubsub: PubSub) -> Result<()> {
        for key in INBOUND_KEYS {
            pubsub.subscribe(key).await?;
        }
        tracing::info!(channels = ?INBOUND_KEYS, "Subscribed to control channels");

        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Ok(());
                }
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Err(Error::bus("control bus stream ended"));
                    };
                    let channel = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            METRICS.inc_malformed();
                            tracing::warn!(routing_key = %channel, "Unreadable bus payload: {}", e);
                            continue;
                        }
                    };

                    match ControlMessage::parse(&channel, &payload) {
                        Ok(parsed) => {
                            tracing::debug!(
                                routing_key = %channel,
                                id = %parsed.client_id(),
                                "Received control message"
                            );
                            if self.events.send(CoordinatorEvent::Message(parsed)).await.is_err() {
                                // Coordinator is gone; nothing left to feed.
                                return Ok(());
                            }
                        }
                        Err(e) => {
                            METRICS.inc_malformed();
                            tracing::warn!(
                                routing_key = %channel,
                                payload = %payload,
                                "Dropping malformed control message: {}",
                                e
                            );
                        }
                    }
                }
            }
        }
    }

    /// Wait a beat before reconnecting; false means shutdown was requested.
    async fn backoff(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_secs(1)) => true,
        }
    }
}
