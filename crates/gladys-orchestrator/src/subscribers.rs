//! Subscriber fan-out.
//!
//! Each subscriber gets a bounded channel backing its server stream.
//! Events are delivered in the order the router popped them; a
//! subscriber whose buffer fills or whose stream closed is dropped from
//! the set without affecting event flow.

use gladys_proto::v1::SubscribedEvent;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

struct Subscription {
    subscriber_id: String,
    source_filters: Vec<String>,
    event_types: Vec<String>,
    tx: mpsc::Sender<Result<SubscribedEvent, tonic::Status>>,
}

impl Subscription {
    fn matches(&self, event: &gladys_proto::v1::Event) -> bool {
        if !self.source_filters.is_empty() && !self.source_filters.contains(&event.source) {
            return false;
        }
        if self.event_types.is_empty() {
            return true;
        }
        // Event "type" is the structured payload's `type` field.
        serde_json::from_str::<serde_json::Value>(&event.structured_json)
            .ok()
            .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .is_some_and(|ty| self.event_types.contains(&ty))
    }
}

/// The live subscriber set.
pub struct SubscriberSet {
    inner: Mutex<Vec<Subscription>>,
    buffer: usize,
}

impl SubscriberSet {
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
        }
    }

    /// Add a subscriber; the returned stream backs the server-streaming
    /// response. A repeat subscribe under the same id replaces the old
    /// stream.
    pub async fn subscribe(
        &self,
        subscriber_id: &str,
        source_filters: Vec<String>,
        event_types: Vec<String>,
    ) -> ReceiverStream<Result<SubscribedEvent, tonic::Status>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let mut inner = self.inner.lock().await;
        inner.retain(|sub| sub.subscriber_id != subscriber_id);
        inner.push(Subscription {
            subscriber_id: subscriber_id.to_string(),
            source_filters,
            event_types,
            tx,
        });
        info!(subscriber_id, "subscriber attached");
        ReceiverStream::new(rx)
    }

    /// Forward one processed event to every matching live subscriber.
    /// Slow or disconnected subscribers are dropped; delivery order per
    /// subscriber follows call order.
    pub async fn fan_out(&self, delivery: &SubscribedEvent) {
        let Some(event) = delivery.event.as_ref() else {
            return;
        };
        let mut inner = self.inner.lock().await;
        inner.retain(|sub| {
            if !sub.matches(event) {
                return true;
            }
            match sub.tx.try_send(Ok(delivery.clone())) {
                Ok(()) => {
                    debug!(subscriber_id = %sub.subscriber_id, event_id = %event.id, "event forwarded");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    info!(subscriber_id = %sub.subscriber_id, "subscriber disconnected; dropping");
                    false
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber_id = %sub.subscriber_id, "subscriber lagging; dropping");
                    false
                }
            }
        });
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
