//! Subscriber notification fan-out
//!
//! When a resource changes, every subscriber of the entity and of its
//! structurally contained children gets notified. Deliveries run
//! concurrently under a semaphore so a slow subscriber cannot starve the
//! rest, and each push/notify delivery retries on 5xx answers with a
//! fixed delay before giving up. Protocol-mode deliveries get a single
//! attempt; the peer connector is expected to fetch the update itself.
//!
//! Dispatch is fire-and-forget relative to the mutation that triggered
//! it: the update handler returns before deliveries finish.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::message::dto::{MessageHeader, RequestEnvelope, RequestMessage};
use crate::model::{DeliveryMode, Subscription};
use crate::store::EntityStore;
use crate::transport::Notifier;
use crate::types::Result;

/// Delivery tuning knobs, kept separate from enforcement config so tests
/// can shrink the retry delay.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Local connector identity, stamped on outgoing protocol messages.
    pub connector_id: String,
    pub protocol_version: String,
    /// Maximum concurrent deliveries.
    pub concurrency: usize,
    /// Retry attempts after the first try, on 5xx answers only.
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            connector_id: "https://covenant.localhost".to_string(),
            protocol_version: "4.0.0".to_string(),
            concurrency: 8,
            retries: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Fans an entity update out to its subscribers
pub struct SubscriberNotifier {
    config: FanoutConfig,
    store: Arc<dyn EntityStore>,
    notifier: Arc<dyn Notifier>,
    permits: Arc<Semaphore>,
}

impl SubscriberNotifier {
    pub fn new(
        config: FanoutConfig,
        store: Arc<dyn EntityStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self { config, store, notifier, permits }
    }

    /// Spawn the fan-out and return immediately.
    pub fn dispatch(self: &Arc<Self>, entity_id: String) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = notifier.notify_on_update(&entity_id).await {
                warn!(entity_id, %err, "subscriber fan-out failed");
            }
        });
    }

    /// Notify every subscriber of `entity_id` and of all entities it
    /// structurally contains. Completes when every delivery has exhausted
    /// its retry budget or succeeded.
    pub async fn notify_on_update(&self, entity_id: &str) -> Result<()> {
        let subscriptions = self.collect_subscriptions(entity_id).await?;
        if subscriptions.is_empty() {
            debug!(entity_id, "no subscribers");
            return Ok(());
        }
        info!(entity_id, count = subscriptions.len(), "notifying subscribers");

        let deliveries = subscriptions.into_iter().map(|subscription| {
            let permits = Arc::clone(&self.permits);
            async move {
                // Closed only on shutdown; a closed semaphore just skips
                // the delivery.
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                self.deliver(&subscription).await;
            }
        });
        join_all(deliveries).await;
        Ok(())
    }

    /// Subscriptions of the entity and, recursively, of its children.
    /// Containment only points downward, the visited set guards against
    /// malformed cyclic links.
    async fn collect_subscriptions(&self, entity_id: &str) -> Result<Vec<Subscription>> {
        let mut subscriptions = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = vec![entity_id.to_string()];

        while let Some(id) = queue.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            subscriptions.extend(self.store.get_subscriptions(&id).await?);
            queue.extend(self.store.get_children(&id).await?);
        }
        Ok(subscriptions)
    }

    async fn deliver(&self, subscription: &Subscription) {
        match subscription.mode {
            DeliveryMode::IdsProtocol => self.deliver_protocol(subscription).await,
            DeliveryMode::PushData => self.deliver_push(subscription).await,
            DeliveryMode::NotifyOnly => {
                self.deliver_with_retry(subscription, None).await;
            }
        }
    }

    /// One resource-update message to a peer connector; single attempt.
    async fn deliver_protocol(&self, subscription: &Subscription) {
        let envelope = RequestEnvelope {
            header: MessageHeader::outbound(
                &self.config.connector_id,
                &self.config.protocol_version,
                None,
            ),
            body: RequestMessage::ResourceUpdate {
                entity_id: subscription.target.clone(),
            },
        };
        let body = match serde_json::to_vec(&envelope) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "resource-update message serialization failed");
                return;
            }
        };

        let headers = self.metadata_headers(subscription);
        match self.notifier.post(&subscription.url, &headers, Some(body)).await {
            Ok(outcome) if outcome.is_success() => {
                debug!(url = %subscription.url, "resource update delivered");
            }
            Ok(outcome) => {
                warn!(url = %subscription.url, ?outcome, "peer connector refused update");
            }
            Err(err) => {
                warn!(url = %subscription.url, %err, "resource update delivery failed");
            }
        }
    }

    /// Current artifact state pushed to the subscriber.
    async fn deliver_push(&self, subscription: &Subscription) {
        let body = match self.store.get_artifact(&subscription.target).await {
            Ok(artifact) => serde_json::to_vec(&artifact).ok(),
            // The subscribed entity is not an artifact; fall back to a
            // metadata-only notification.
            Err(_) => None,
        };
        self.deliver_with_retry(subscription, body).await;
    }

    /// POST with metadata headers, retrying on 5xx answers.
    async fn deliver_with_retry(&self, subscription: &Subscription, body: Option<Vec<u8>>) {
        let headers = self.metadata_headers(subscription);

        for attempt in 0..=self.config.retries {
            match self
                .notifier
                .post(&subscription.url, &headers, body.clone())
                .await
            {
                Ok(outcome) if outcome.is_success() => {
                    debug!(url = %subscription.url, attempt, "subscriber notified");
                    return;
                }
                Ok(outcome) if outcome.is_retryable() && attempt < self.config.retries => {
                    debug!(url = %subscription.url, attempt, ?outcome, "retrying delivery");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Ok(outcome) => {
                    warn!(url = %subscription.url, ?outcome, "subscriber delivery gave up");
                    return;
                }
                Err(err) => {
                    warn!(url = %subscription.url, %err, "subscriber delivery failed");
                    return;
                }
            }
        }
    }

    fn metadata_headers(&self, subscription: &Subscription) -> Vec<(String, String)> {
        vec![
            ("content-type".to_string(), "application/json".to_string()),
            ("x-entity-id".to_string(), subscription.target.clone()),
            (
                "x-issuer-connector".to_string(),
                self.config.connector_id.clone(),
            ),
        ]
    }
}
