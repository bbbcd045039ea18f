//! Inbound message handling
//!
//! One handler per message kind, dispatched from a single entry point.
//! Handlers never panic and never leak internal errors: every failure is
//! converted into a rejection message with a typed reason, and only
//! allowed artifact requests reach the data release step.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EnforcementConfig;
use crate::message::dto::{
    MessageHeader, RequestEnvelope, RequestMessage, ResponseEnvelope, ResponseMessage,
    SelfDescription,
};
use crate::message::validator::ValidationPipeline;
use crate::model::{ContractAgreement, ContractRequest};
use crate::notify::SubscriberNotifier;
use crate::policy::matcher::{find_matching_offer, rules_match, MatchOutcome};
use crate::policy::{ContractManager, PolicyExecutor, UsageControlVerifier, ENFORCED_ON_ACCESS};
use crate::store::EntityStore;
use crate::transport::Notifier;
use crate::types::{ConnectorError, Result};

/// Dispatches inbound messages to the negotiation and enforcement engine
pub struct MessageHandler {
    config: EnforcementConfig,
    store: Arc<dyn EntityStore>,
    manager: ContractManager,
    verifier: UsageControlVerifier,
    executor: PolicyExecutor,
    fanout: Arc<SubscriberNotifier>,
    artifact_pipeline: ValidationPipeline,
    contract_pipeline: ValidationPipeline,
    common_pipeline: ValidationPipeline,
}

impl MessageHandler {
    pub fn new(
        config: EnforcementConfig,
        store: Arc<dyn EntityStore>,
        notifier: Arc<dyn Notifier>,
        fanout: Arc<SubscriberNotifier>,
    ) -> Self {
        Self {
            manager: ContractManager::new(config.clone(), Arc::clone(&store)),
            verifier: UsageControlVerifier::new(config.clone(), Arc::clone(&store)),
            executor: PolicyExecutor::new(config.clone(), Arc::clone(&store), notifier),
            artifact_pipeline: ValidationPipeline::for_artifact_request(&config),
            contract_pipeline: ValidationPipeline::for_contract_request(&config),
            common_pipeline: ValidationPipeline::new(ValidationPipeline::common(&config)),
            config,
            store,
            fanout,
        }
    }

    /// Handle one inbound message. Always produces a response; failures
    /// become rejection messages.
    pub async fn handle(&self, envelope: RequestEnvelope) -> ResponseEnvelope {
        let result = match &envelope.body {
            RequestMessage::Description => self.handle_description(&envelope).await,
            RequestMessage::ContractRequest { request } => {
                self.handle_contract_request(&envelope, request).await
            }
            RequestMessage::ContractAgreement { agreement } => {
                self.handle_contract_agreement(&envelope, agreement).await
            }
            RequestMessage::ArtifactRequest { .. } => self.handle_artifact_request(&envelope).await,
            RequestMessage::ResourceUpdate { entity_id } => {
                self.handle_resource_update(&envelope, entity_id).await
            }
        };

        let body = match result {
            Ok(body) => body,
            Err(err) => {
                debug!(%err, "request rejected");
                ResponseMessage::Rejection {
                    reason: err.rejection_reason(),
                    message: err.to_string(),
                }
            }
        };

        ResponseEnvelope {
            header: MessageHeader::outbound(
                &self.config.connector_id,
                &self.config.protocol_version,
                Some(envelope.header.id),
            ),
            body,
        }
    }

    /// Self-description: identity, build version and the patterns this
    /// connector enforces. Catalog bodies are out of scope.
    async fn handle_description(&self, envelope: &RequestEnvelope) -> Result<ResponseMessage> {
        self.common_pipeline.run(envelope).await?;
        Ok(ResponseMessage::Description {
            description: SelfDescription {
                connector_id: self.config.connector_id.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                protocol_version: self.config.protocol_version.clone(),
                supported_patterns: ENFORCED_ON_ACCESS.to_vec(),
            },
        })
    }

    /// Negotiation entry: validate, match every target against the
    /// published offers, then answer with an unconfirmed agreement.
    async fn handle_contract_request(
        &self,
        envelope: &RequestEnvelope,
        request: &ContractRequest,
    ) -> Result<ResponseMessage> {
        self.contract_pipeline.run(envelope).await?;

        let issuer = &envelope.header.issuer_connector;
        let now = Utc::now();

        // Every target needs a matching offer. The agreement ends when
        // the tightest matched offer ends.
        let mut contract_end = None;
        for target in request.targets() {
            let offers = self.store.get_offers_by_artifact(&target).await?;
            let requested = request.rules_for_target(&target);
            match find_matching_offer(&offers, &requested, &target, issuer, now) {
                MatchOutcome::Matched(offer) => {
                    contract_end = match contract_end {
                        Some(end) if end <= offer.end => Some(end),
                        _ => Some(offer.end),
                    };
                }
                MatchOutcome::NoOffersForTarget => {
                    return Err(ConnectorError::NoOffersForTarget(target));
                }
                MatchOutcome::RulesMismatch => {
                    return Err(ConnectorError::RulesMismatch(format!(
                        "no offer covers the requested rules for {target}"
                    )));
                }
            }
        }

        let mut matched = request.clone();
        matched.contract_end = contract_end;

        let agreement =
            self.manager
                .build_contract_agreement(&matched, Uuid::new_v4(), issuer)?;
        info!(agreement_id = %agreement.id, issuer, "negotiation produced agreement");
        self.store.save_agreement(agreement.clone()).await?;

        Ok(ResponseMessage::ContractAgreement { agreement })
    }

    /// Negotiation close: the consumer returns the agreement it accepted;
    /// confirm it if it is the one this connector issued.
    async fn handle_contract_agreement(
        &self,
        envelope: &RequestEnvelope,
        returned: &ContractAgreement,
    ) -> Result<ResponseMessage> {
        self.common_pipeline.run(envelope).await?;

        let stored = self.store.get_agreement(returned.id).await?;

        if envelope.header.issuer_connector != stored.consumer {
            return Err(ConnectorError::PolicyRestriction(
                "agreement was not negotiated with the issuing connector".into(),
            ));
        }
        if !rules_match(&stored.rules, &returned.rules) {
            warn!(agreement_id = %returned.id, "returned agreement rules differ from issued ones");
            return Err(ConnectorError::PolicyRestriction(
                "returned agreement does not match the issued one".into(),
            ));
        }

        self.store.confirm_agreement(stored.id).await?;
        info!(agreement_id = %stored.id, "agreement confirmed");
        Ok(ResponseMessage::MessageProcessed)
    }

    /// Data release: validate, resolve the transfer contract, verify
    /// usage control, discharge the pending side effects, then hand out
    /// the data reference.
    async fn handle_artifact_request(&self, envelope: &RequestEnvelope) -> Result<ResponseMessage> {
        self.artifact_pipeline.run(envelope).await?;

        let RequestMessage::ArtifactRequest { artifact_id, transfer_contract } = &envelope.body
        else {
            return Err(ConnectorError::Internal(
                "artifact pipeline ran on a non-artifact message".into(),
            ));
        };
        let agreement_id = (*transfer_contract).ok_or_else(|| {
            ConnectorError::MalformedMessage("transfer contract id is missing".into())
        })?;

        let issuer = &envelope.header.issuer_connector;
        let agreement = self
            .manager
            .validate_transfer_contract(agreement_id, artifact_id, issuer)
            .await?;

        let verdict = self.verifier.verify(artifact_id, &agreement).await?;
        if !verdict.is_allowed() {
            return Err(ConnectorError::PolicyRestriction(format!(
                "usage control denied access to {artifact_id}"
            )));
        }

        // Side effects before data: a failed counter commit or strict
        // duty failure still rejects here.
        self.executor.execute(&verdict.pending, issuer).await?;

        let artifact = self.store.get_artifact(artifact_id).await?;
        let data_ref = artifact
            .remote_id
            .unwrap_or_else(|| format!("urn:covenant:artifact:{}", artifact.id));
        info!(artifact_id, %agreement_id, issuer, "artifact released");

        Ok(ResponseMessage::ArtifactResponse {
            artifact_id: artifact_id.clone(),
            data_ref,
        })
    }

    /// Mirror update: acknowledge and fan the update out to subscribers
    /// without holding the sender.
    async fn handle_resource_update(
        &self,
        envelope: &RequestEnvelope,
        entity_id: &str,
    ) -> Result<ResponseMessage> {
        self.common_pipeline.run(envelope).await?;

        if entity_id.trim().is_empty() {
            return Err(ConnectorError::MalformedMessage(
                "updated entity id is missing".into(),
            ));
        }

        info!(entity_id, issuer = %envelope.header.issuer_connector, "resource updated");
        self.fanout.dispatch(entity_id.to_string());
        Ok(ResponseMessage::MessageProcessed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, ContractOffer, Rule, RuleCondition};
    use crate::notify::FanoutConfig;
    use crate::store::InMemoryStore;
    use crate::transport::PostOutcome;
    use crate::types::RejectionReason;
    use async_trait::async_trait;
    use chrono::Duration;

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        async fn post(
            &self,
            _url: &str,
            _headers: &[(String, String)],
            _body: Option<Vec<u8>>,
        ) -> Result<PostOutcome> {
            Ok(PostOutcome::Accepted(200))
        }
    }

    fn handler() -> (MessageHandler, Arc<InMemoryStore>) {
        let config = EnforcementConfig {
            connector_id: "https://provider.example".into(),
            ..Default::default()
        };
        let store = Arc::new(InMemoryStore::new());
        let notifier: Arc<dyn Notifier> = Arc::new(SilentNotifier);
        let fanout = Arc::new(SubscriberNotifier::new(
            FanoutConfig::default(),
            store.clone() as Arc<dyn EntityStore>,
            Arc::clone(&notifier),
        ));
        (
            MessageHandler::new(config, store.clone(), notifier, fanout),
            store,
        )
    }

    fn inbound(body: RequestMessage) -> RequestEnvelope {
        RequestEnvelope {
            header: MessageHeader::outbound("https://consumer.example", "4.0.0", None),
            body,
        }
    }

    fn publish_offer(store: &InMemoryStore, rules: Vec<Rule>) {
        let now = Utc::now();
        store.insert_offer(ContractOffer {
            id: Uuid::new_v4(),
            provider: "https://provider.example".into(),
            rules,
            start: now - Duration::hours(1),
            end: now + Duration::days(7),
            restricted_consumer: None,
        });
    }

    fn contract_request(rules: Vec<Rule>) -> RequestMessage {
        RequestMessage::ContractRequest {
            request: ContractRequest {
                consumer: "https://consumer.example".into(),
                permissions: rules,
                prohibitions: vec![],
                obligations: vec![],
                contract_end: None,
            },
        }
    }

    /// Full negotiation round: request, returned agreement, confirmation.
    async fn negotiate(
        handler: &MessageHandler,
        rules: Vec<Rule>,
    ) -> ContractAgreement {
        let response = handler.handle(inbound(contract_request(rules))).await;
        let ResponseMessage::ContractAgreement { agreement } = response.body else {
            panic!("expected agreement, got {:?}", response.body);
        };

        let response = handler
            .handle(inbound(RequestMessage::ContractAgreement {
                agreement: agreement.clone(),
            }))
            .await;
        assert!(matches!(response.body, ResponseMessage::MessageProcessed));
        agreement
    }

    #[tokio::test]
    async fn test_description_lists_patterns() {
        let (handler, _) = handler();
        let response = handler.handle(inbound(RequestMessage::Description)).await;
        let ResponseMessage::Description { description } = response.body else {
            panic!("expected description");
        };
        assert_eq!(description.supported_patterns.len(), 7);
        assert_eq!(description.connector_id, "https://provider.example");
    }

    #[tokio::test]
    async fn test_negotiation_and_access() {
        let (handler, store) = handler();
        store.insert_artifact(Artifact::new("artifact-1"));
        publish_offer(&store, vec![Rule::permission("artifact-1")]);

        let agreement = negotiate(&handler, vec![Rule::permission("artifact-1")]).await;

        let response = handler
            .handle(inbound(RequestMessage::ArtifactRequest {
                artifact_id: "artifact-1".into(),
                transfer_contract: Some(agreement.id),
            }))
            .await;
        assert!(matches!(
            response.body,
            ResponseMessage::ArtifactResponse { .. }
        ));
        assert_eq!(response.header.correlation_id.is_some(), true);
    }

    #[tokio::test]
    async fn test_unconfirmed_agreement_blocks_access() {
        let (handler, store) = handler();
        store.insert_artifact(Artifact::new("artifact-1"));
        publish_offer(&store, vec![Rule::permission("artifact-1")]);

        let response = handler
            .handle(inbound(contract_request(vec![Rule::permission("artifact-1")])))
            .await;
        let ResponseMessage::ContractAgreement { agreement } = response.body else {
            panic!("expected agreement");
        };

        // Skip confirmation and go straight for the data.
        let response = handler
            .handle(inbound(RequestMessage::ArtifactRequest {
                artifact_id: "artifact-1".into(),
                transfer_contract: Some(agreement.id),
            }))
            .await;
        let ResponseMessage::Rejection { reason, .. } = response.body else {
            panic!("expected rejection");
        };
        assert_eq!(reason, RejectionReason::PolicyRestriction);
    }

    #[tokio::test]
    async fn test_request_without_offers_is_rejected() {
        let (handler, _) = handler();
        let response = handler
            .handle(inbound(contract_request(vec![Rule::permission("artifact-1")])))
            .await;
        let ResponseMessage::Rejection { reason, .. } = response.body else {
            panic!("expected rejection");
        };
        assert_eq!(reason, RejectionReason::NotFound);
    }

    #[tokio::test]
    async fn test_mismatched_rules_are_soft_rejected() {
        let (handler, store) = handler();
        let offered = Rule::permission("artifact-1").with_condition(RuleCondition {
            max_count: Some(1),
            ..Default::default()
        });
        publish_offer(&store, vec![offered]);

        let response = handler
            .handle(inbound(contract_request(vec![Rule::permission("artifact-1")])))
            .await;
        let ResponseMessage::Rejection { reason, .. } = response.body else {
            panic!("expected rejection");
        };
        assert_eq!(reason, RejectionReason::PolicyRestriction);
    }

    #[tokio::test]
    async fn test_tampered_agreement_is_not_confirmed() {
        let (handler, store) = handler();
        store.insert_artifact(Artifact::new("artifact-1"));
        publish_offer(&store, vec![Rule::permission("artifact-1")]);

        let response = handler
            .handle(inbound(contract_request(vec![Rule::permission("artifact-1")])))
            .await;
        let ResponseMessage::ContractAgreement { mut agreement } = response.body else {
            panic!("expected agreement");
        };
        agreement.rules.push(Rule::permission("artifact-99"));

        let response = handler
            .handle(inbound(RequestMessage::ContractAgreement { agreement }))
            .await;
        assert!(response.is_rejection());
    }

    #[tokio::test]
    async fn test_n_times_usage_counts_down() {
        let (handler, store) = handler();
        store.insert_artifact(Artifact::new("artifact-1"));
        let counted = Rule::permission("artifact-1").with_condition(RuleCondition {
            max_count: Some(1),
            ..Default::default()
        });
        publish_offer(&store, vec![counted.clone()]);

        let agreement = negotiate(&handler, vec![counted]).await;
        let request = || {
            inbound(RequestMessage::ArtifactRequest {
                artifact_id: "artifact-1".into(),
                transfer_contract: Some(agreement.id),
            })
        };

        let first = handler.handle(request()).await;
        assert!(matches!(first.body, ResponseMessage::ArtifactResponse { .. }));

        let second = handler.handle(request()).await;
        let ResponseMessage::Rejection { reason, .. } = second.body else {
            panic!("expected rejection on the second access");
        };
        assert_eq!(reason, RejectionReason::PolicyRestriction);
    }

    #[tokio::test]
    async fn test_resource_update_is_acknowledged() {
        let (handler, _) = handler();
        let response = handler
            .handle(inbound(RequestMessage::ResourceUpdate {
                entity_id: "resource-1".into(),
            }))
            .await;
        assert!(matches!(response.body, ResponseMessage::MessageProcessed));
    }

    #[tokio::test]
    async fn test_malformed_artifact_request() {
        let (handler, _) = handler();
        let response = handler
            .handle(inbound(RequestMessage::ArtifactRequest {
                artifact_id: "".into(),
                transfer_contract: None,
            }))
            .await;
        let ResponseMessage::Rejection { reason, .. } = response.body else {
            panic!("expected rejection");
        };
        assert_eq!(reason, RejectionReason::MalformedMessage);
    }
}
