//! Entity store seam
//!
//! The connector core never talks to a database directly; everything goes
//! through the `EntityStore` trait. The in-memory implementation backs
//! tests and single-node deployments. The two mutations that matter for
//! correctness - the artifact access counter and the agreement
//! `confirmed` flag - are atomic with respect to concurrent access
//! attempts on the same entity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::model::{Artifact, ContractAgreement, ContractOffer, Subscription};
use crate::types::{ConnectorError, Result};

/// Storage contract consumed by the negotiation and enforcement engine
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Resolve an agreement by id. NotFound when the id is unknown.
    async fn get_agreement(&self, id: Uuid) -> Result<ContractAgreement>;

    /// Resolve an artifact by id. NotFound when the id is unknown.
    async fn get_artifact(&self, id: &str) -> Result<Artifact>;

    /// All contract offers whose rules cover the given artifact.
    async fn get_offers_by_artifact(&self, target: &str) -> Result<Vec<ContractOffer>>;

    /// Persist a freshly negotiated (unconfirmed) agreement.
    async fn save_agreement(&self, agreement: ContractAgreement) -> Result<()>;

    /// Atomically flip the agreement's `confirmed` flag. NotFound when
    /// the id is unknown.
    async fn confirm_agreement(&self, id: Uuid) -> Result<()>;

    /// Atomically increment the artifact's access counter if it is still
    /// below `max`. Returns the committed counter value, or None when the
    /// slot race was lost.
    async fn try_increment_access(&self, artifact_id: &str, max: u64) -> Result<Option<u64>>;

    /// Record the first-access timestamp once; later calls return the
    /// original value.
    async fn record_first_access(
        &self,
        artifact_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>>;

    /// Direct subscriptions attached to an entity id.
    async fn get_subscriptions(&self, target: &str) -> Result<Vec<Subscription>>;

    /// Structurally contained child entity ids (resource -> representations
    /// -> artifacts). Never reports parents.
    async fn get_children(&self, entity_id: &str) -> Result<Vec<String>>;
}

/// In-memory entity store
#[derive(Default)]
pub struct InMemoryStore {
    agreements: DashMap<Uuid, ContractAgreement>,
    artifacts: DashMap<String, Artifact>,
    offers: DashMap<Uuid, ContractOffer>,
    subscriptions: DashMap<String, Vec<Subscription>>,
    children: DashMap<String, Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_artifact(&self, artifact: Artifact) {
        self.artifacts.insert(artifact.id.clone(), artifact);
    }

    pub fn insert_offer(&self, offer: ContractOffer) {
        self.offers.insert(offer.id, offer);
    }

    pub fn remove_offer(&self, id: Uuid) {
        self.offers.remove(&id);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .entry(subscription.target.clone())
            .or_default()
            .push(subscription);
    }

    pub fn link_child(&self, parent: &str, child: &str) {
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get_agreement(&self, id: Uuid) -> Result<ContractAgreement> {
        self.agreements
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ConnectorError::NotFound(format!("agreement {id}")))
    }

    async fn get_artifact(&self, id: &str) -> Result<Artifact> {
        self.artifacts
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ConnectorError::NotFound(format!("artifact {id}")))
    }

    async fn get_offers_by_artifact(&self, target: &str) -> Result<Vec<ContractOffer>> {
        Ok(self
            .offers
            .iter()
            .filter(|entry| entry.rules.iter().any(|rule| rule.target == target))
            .map(|entry| entry.clone())
            .collect())
    }

    async fn save_agreement(&self, agreement: ContractAgreement) -> Result<()> {
        self.agreements.insert(agreement.id, agreement);
        Ok(())
    }

    async fn confirm_agreement(&self, id: Uuid) -> Result<()> {
        match self.agreements.get_mut(&id) {
            Some(mut entry) => {
                entry.confirmed = true;
                Ok(())
            }
            None => Err(ConnectorError::NotFound(format!("agreement {id}"))),
        }
    }

    async fn try_increment_access(&self, artifact_id: &str, max: u64) -> Result<Option<u64>> {
        // The dashmap entry guard makes the read-compare-write atomic.
        match self.artifacts.get_mut(artifact_id) {
            Some(mut entry) => {
                if entry.num_accessed < max {
                    entry.num_accessed += 1;
                    Ok(Some(entry.num_accessed))
                } else {
                    Ok(None)
                }
            }
            None => Err(ConnectorError::NotFound(format!("artifact {artifact_id}"))),
        }
    }

    async fn record_first_access(
        &self,
        artifact_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        match self.artifacts.get_mut(artifact_id) {
            Some(mut entry) => {
                if let Some(first) = entry.first_access {
                    Ok(first)
                } else {
                    entry.first_access = Some(now);
                    Ok(now)
                }
            }
            None => Err(ConnectorError::NotFound(format!("artifact {artifact_id}"))),
        }
    }

    async fn get_subscriptions(&self, target: &str) -> Result<Vec<Subscription>> {
        Ok(self
            .subscriptions
            .get(target)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn get_children(&self, entity_id: &str) -> Result<Vec<String>> {
        Ok(self
            .children
            .get(entity_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.get_agreement(Uuid::new_v4()).await,
            Err(ConnectorError::NotFound(_))
        ));
        assert!(matches!(
            store.get_artifact("missing").await,
            Err(ConnectorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_increment_stops_at_max() {
        let store = InMemoryStore::new();
        store.insert_artifact(Artifact::new("artifact-1"));

        assert_eq!(store.try_increment_access("artifact-1", 2).await.unwrap(), Some(1));
        assert_eq!(store.try_increment_access("artifact-1", 2).await.unwrap(), Some(2));
        assert_eq!(store.try_increment_access("artifact-1", 2).await.unwrap(), None);

        let artifact = store.get_artifact("artifact-1").await.unwrap();
        assert_eq!(artifact.num_accessed, 2);
    }

    #[tokio::test]
    async fn test_concurrent_increments_never_exceed_max() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_artifact(Artifact::new("artifact-1"));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.try_increment_access("artifact-1", 4).await.unwrap()
            }));
        }

        let mut committed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                committed += 1;
            }
        }

        assert_eq!(committed, 4);
        let artifact = store.get_artifact("artifact-1").await.unwrap();
        assert_eq!(artifact.num_accessed, 4);
    }

    #[tokio::test]
    async fn test_first_access_recorded_once() {
        let store = InMemoryStore::new();
        store.insert_artifact(Artifact::new("artifact-1"));

        let first = Utc::now();
        let recorded = store.record_first_access("artifact-1", first).await.unwrap();
        assert_eq!(recorded, first);

        let later = first + chrono::Duration::minutes(5);
        let recorded = store.record_first_access("artifact-1", later).await.unwrap();
        assert_eq!(recorded, first);
    }

    #[tokio::test]
    async fn test_offer_lookup_by_target() {
        use crate::model::{ContractOffer, Rule};
        let store = InMemoryStore::new();
        let now = Utc::now();
        store.insert_offer(ContractOffer {
            id: Uuid::new_v4(),
            provider: "https://provider.example".into(),
            rules: vec![Rule::permission("artifact-1")],
            start: now,
            end: now + chrono::Duration::days(7),
            restricted_consumer: None,
        });

        assert_eq!(store.get_offers_by_artifact("artifact-1").await.unwrap().len(), 1);
        assert!(store.get_offers_by_artifact("artifact-2").await.unwrap().is_empty());
    }
}
