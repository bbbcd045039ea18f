//! Contract offers, requests and agreements

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::{Rule, RuleKind};

/// A provider-published set of rules a consumer may request
///
/// Offers are created when a resource is published and deleted when it is
/// withdrawn; during negotiation they are read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractOffer {
    pub id: Uuid,
    /// Provider connector identity.
    pub provider: String,
    pub rules: Vec<Rule>,
    /// Start of the offer's validity interval.
    pub start: DateTime<Utc>,
    /// End of the offer's validity interval. Propagated into agreements
    /// negotiated from this offer.
    pub end: DateTime<Utc>,
    /// When set, only this consumer connector may negotiate the offer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restricted_consumer: Option<String>,
}

impl ContractOffer {
    /// Check whether the offer's validity interval covers `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now <= self.end
    }

    /// Check whether the issuer passes the consumer restriction. An unset
    /// or blank restriction admits everyone.
    pub fn admits_consumer(&self, issuer: &str) -> bool {
        match &self.restricted_consumer {
            Some(consumer) if !consumer.trim().is_empty() => consumer == issuer,
            _ => true,
        }
    }
}

/// A consumer-constructed contract request
///
/// Transient: exists only during negotiation. Rules are partitioned by
/// kind the way the protocol represents them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRequest {
    /// Requesting connector identity.
    pub consumer: String,
    pub permissions: Vec<Rule>,
    pub prohibitions: Vec<Rule>,
    pub obligations: Vec<Rule>,
    /// End date taken from the matched offer during validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_end: Option<DateTime<Utc>>,
}

impl ContractRequest {
    /// All rules of the request as one list.
    pub fn all_rules(&self) -> Vec<Rule> {
        let mut rules = self.permissions.clone();
        rules.extend(self.prohibitions.clone());
        rules.extend(self.obligations.clone());
        rules
    }

    /// Rules whose target equals the given artifact id.
    pub fn rules_for_target(&self, target: &str) -> Vec<Rule> {
        self.all_rules()
            .into_iter()
            .filter(|rule| rule.target == target)
            .collect()
    }

    /// Distinct targets across all rules, in first-seen order.
    pub fn targets(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for rule in self.all_rules() {
            if !seen.contains(&rule.target) {
                seen.push(rule.target.clone());
            }
        }
        seen
    }
}

/// The negotiated outcome: rules bound to both parties
///
/// Immutable after confirmation except for the `confirmed` and `archived`
/// transitions, which go through the entity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractAgreement {
    pub id: Uuid,
    /// Provider connector identity (rule assigner).
    pub provider: String,
    /// Consumer connector identity (the negotiation counterparty).
    pub consumer: String,
    pub rules: Vec<Rule>,
    pub contract_date: DateTime<Utc>,
    pub contract_start: DateTime<Utc>,
    pub contract_end: DateTime<Utc>,
    /// Set true only once the provider's confirmation message is accepted.
    #[serde(default)]
    pub confirmed: bool,
    /// Set true once the agreement is no longer enforceable.
    #[serde(default)]
    pub archived: bool,
}

impl ContractAgreement {
    /// Rules on this agreement whose target equals the artifact id. An
    /// agreement may bundle rules for several artifacts.
    pub fn rules_for_target(&self, target: &str) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.target == target)
            .collect()
    }

    /// Distinct artifact ids covered by this agreement.
    pub fn covered_artifacts(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for rule in &self.rules {
            if !seen.contains(&rule.target) {
                seen.push(rule.target.clone());
            }
        }
        seen
    }

    /// Check whether the agreement's end date has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.contract_end < now
    }
}

/// Partition a flat rule list by kind.
pub fn partition_rules(rules: Vec<Rule>) -> (Vec<Rule>, Vec<Rule>, Vec<Rule>) {
    let mut permissions = Vec::new();
    let mut prohibitions = Vec::new();
    let mut obligations = Vec::new();
    for rule in rules {
        match rule.kind {
            RuleKind::Permission => permissions.push(rule),
            RuleKind::Prohibition => prohibitions.push(rule),
            RuleKind::Duty => obligations.push(rule),
        }
    }
    (permissions, prohibitions, obligations)
}
