//! Contract management
//!
//! Builds contract requests and agreements, validates agreements returned
//! by a provider, and gates artifact transfers on a confirmed agreement.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::config::EnforcementConfig;
use crate::model::{partition_rules, ContractAgreement, ContractRequest, Rule};
use crate::store::EntityStore;
use crate::types::{ConnectorError, Result};

/// Service for building and validating contracts
pub struct ContractManager {
    config: EnforcementConfig,
    store: Arc<dyn EntityStore>,
}

impl ContractManager {
    pub fn new(config: EnforcementConfig, store: Arc<dyn EntityStore>) -> Self {
        Self { config, store }
    }

    /// Build a contract request from a rule list, stamping the local
    /// connector as assignee on every rule. Fails on an empty list.
    pub fn build_contract_request(&self, rules: Vec<Rule>) -> Result<ContractRequest> {
        if rules.is_empty() {
            return Err(ConnectorError::MissingRules(
                "cannot build a contract request without rules".into(),
            ));
        }

        let stamped: Vec<Rule> = rules
            .into_iter()
            .map(|mut rule| {
                rule.assignee = Some(self.config.connector_id.clone());
                rule
            })
            .collect();

        let (permissions, prohibitions, obligations) = partition_rules(stamped);

        Ok(ContractRequest {
            consumer: self.config.connector_id.clone(),
            permissions,
            prohibitions,
            obligations,
            contract_end: None,
        })
    }

    /// Build a contract agreement from a validated request. The local
    /// connector signs as assigner/provider; `consumer` is the
    /// counterparty taken from the inbound message.
    pub fn build_contract_agreement(
        &self,
        request: &ContractRequest,
        agreement_id: Uuid,
        consumer: &str,
    ) -> Result<ContractAgreement> {
        let contract_end = request.contract_end.ok_or_else(|| {
            ConnectorError::Internal(
                "contract request carries no end date; offer matching must run first".into(),
            )
        })?;

        let rules: Vec<Rule> = request
            .all_rules()
            .into_iter()
            .map(|mut rule| {
                rule.assigner = Some(self.config.connector_id.clone());
                rule
            })
            .collect();

        if rules.is_empty() {
            return Err(ConnectorError::MissingRules(
                "contract request carries no rules".into(),
            ));
        }

        let now = Utc::now();
        Ok(ContractAgreement {
            id: agreement_id,
            provider: self.config.connector_id.clone(),
            consumer: consumer.to_string(),
            rules,
            contract_date: now,
            contract_start: now,
            contract_end,
            confirmed: false,
            archived: false,
        })
    }

    /// Parse and validate a contract agreement returned by a provider.
    ///
    /// Verifies the assigner on every rule equals the expected provider
    /// and that every agreement rule is semantically present in the
    /// original request, so a malicious provider cannot substitute rules.
    pub fn validate_contract_agreement(
        &self,
        payload: &str,
        original_request: &ContractRequest,
        expected_provider: &str,
    ) -> Result<ContractAgreement> {
        let agreement: ContractAgreement = serde_json::from_str(payload)?;

        for rule in &agreement.rules {
            match &rule.assigner {
                Some(assigner) if assigner == expected_provider => {}
                other => {
                    return Err(ConnectorError::PolicyRestriction(format!(
                        "rule assigner {:?} does not match provider {expected_provider}",
                        other
                    )))
                }
            }
        }

        let requested = original_request.all_rules();
        for rule in &agreement.rules {
            if !requested.iter().any(|r| r.same_policy(rule)) {
                return Err(ConnectorError::PolicyRestriction(
                    "agreement carries a rule that was never requested".into(),
                ));
            }
        }

        Ok(agreement)
    }

    /// Gate for artifact requests: resolve the transfer contract and
    /// check it covers the requested artifact, is confirmed, has not
    /// expired, and was signed for the issuing connector.
    pub async fn validate_transfer_contract(
        &self,
        agreement_id: Uuid,
        requested_artifact: &str,
        issuer: &str,
    ) -> Result<ContractAgreement> {
        let agreement = self.store.get_agreement(agreement_id).await?;

        if !agreement
            .covered_artifacts()
            .iter()
            .any(|artifact| artifact == requested_artifact)
        {
            return Err(ConnectorError::PolicyRestriction(format!(
                "transfer contract {agreement_id} does not cover artifact {requested_artifact}"
            )));
        }

        // Negotiation has to be finished to make the agreement valid.
        if !agreement.confirmed {
            return Err(ConnectorError::PolicyRestriction(
                "contract agreement has not been confirmed; finish the negotiation sequence"
                    .into(),
            ));
        }

        if agreement.is_expired(Utc::now()) {
            return Err(ConnectorError::PolicyRestriction(format!(
                "agreement {agreement_id} has expired"
            )));
        }

        if agreement.consumer != issuer {
            debug!(issuer, consumer = %agreement.consumer, "issuer mismatch");
            return Err(ConnectorError::PolicyRestriction(
                "issuer connector does not correspond to the signed consumer".into(),
            ));
        }

        Ok(agreement)
    }
}
