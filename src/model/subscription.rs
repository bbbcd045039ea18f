//! Subscriptions to entity mutations
//!
//! Subscription management lives outside the core; the fan-out only reads
//! these records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a subscriber wants to be notified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Protocol-level resource-update message to a peer connector.
    IdsProtocol,
    /// POST the artifact's current data plus metadata headers.
    PushData,
    /// POST metadata headers with an empty body.
    NotifyOnly,
}

/// A subscriber's interest in one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    /// Entity id the subscription is attached to.
    pub target: String,
    /// Subscriber identity.
    pub subscriber: String,
    /// Delivery URL (callback endpoint or peer connector address).
    pub url: String,
    pub mode: DeliveryMode,
}
