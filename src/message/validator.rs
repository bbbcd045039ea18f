//! Inbound message validation
//!
//! Each check is one stage; a pipeline is an ordered list of stages run
//! as a plain loop. The first failing stage short-circuits, so later
//! stages never observe (or act on) a message an earlier stage already
//! rejected.

use async_trait::async_trait;
use tracing::debug;

use crate::config::EnforcementConfig;
use crate::message::dto::{RequestEnvelope, RequestMessage};
use crate::types::{ConnectorError, Result};

/// One validation stage
#[async_trait]
pub trait MessageValidator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn validate(&self, envelope: &RequestEnvelope) -> Result<()>;
}

/// Ordered list of stages
pub struct ValidationPipeline {
    stages: Vec<Box<dyn MessageValidator>>,
}

impl ValidationPipeline {
    pub fn new(stages: Vec<Box<dyn MessageValidator>>) -> Self {
        Self { stages }
    }

    /// Run every stage in order; the first failure wins.
    pub async fn run(&self, envelope: &RequestEnvelope) -> Result<()> {
        for stage in &self.stages {
            if let Err(err) = stage.validate(envelope).await {
                debug!(stage = stage.name(), %err, "validation stage failed");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Stages shared by every inbound message: header sanity, protocol
    /// version, connector availability.
    pub fn common(config: &EnforcementConfig) -> Vec<Box<dyn MessageValidator>> {
        vec![
            Box::new(HeaderValidator { supported_version: config.protocol_version.clone() }),
            Box::new(OnlineValidator { offline: config.offline }),
        ]
    }

    /// Pipeline for artifact requests: common stages, then artifact id
    /// and transfer contract id presence. The transfer-contract gate and
    /// access verification follow in the handler, in this order.
    pub fn for_artifact_request(config: &EnforcementConfig) -> Self {
        let mut stages = Self::common(config);
        stages.push(Box::new(ArtifactIdValidator));
        stages.push(Box::new(TransferContractValidator));
        Self::new(stages)
    }

    /// Pipeline for contract requests: common stages, then rule targets
    /// and rule presence. Offer matching follows in the handler.
    pub fn for_contract_request(config: &EnforcementConfig) -> Self {
        let mut stages = Self::common(config);
        stages.push(Box::new(RuleTargetValidator));
        stages.push(Box::new(RulesPresentValidator));
        Self::new(stages)
    }
}

/// Header is well-formed and the protocol version is supported
struct HeaderValidator {
    supported_version: String,
}

#[async_trait]
impl MessageValidator for HeaderValidator {
    fn name(&self) -> &'static str {
        "header"
    }

    async fn validate(&self, envelope: &RequestEnvelope) -> Result<()> {
        let header = &envelope.header;
        if header.issuer_connector.trim().is_empty() {
            return Err(ConnectorError::MalformedMessage(
                "issuer connector is missing".into(),
            ));
        }
        if header.protocol_version.trim().is_empty() {
            return Err(ConnectorError::MalformedMessage(
                "protocol version is missing".into(),
            ));
        }
        // Compatibility is decided on the major version.
        let major = |version: &str| version.split('.').next().map(str::to_string);
        if major(&header.protocol_version) != major(&self.supported_version) {
            return Err(ConnectorError::VersionNotSupported(
                header.protocol_version.clone(),
            ));
        }
        Ok(())
    }
}

/// Connector accepts traffic at all
struct OnlineValidator {
    offline: bool,
}

#[async_trait]
impl MessageValidator for OnlineValidator {
    fn name(&self) -> &'static str {
        "online"
    }

    async fn validate(&self, _envelope: &RequestEnvelope) -> Result<()> {
        if self.offline {
            Err(ConnectorError::ConnectorOffline)
        } else {
            Ok(())
        }
    }
}

/// Artifact requests name the artifact they want
struct ArtifactIdValidator;

#[async_trait]
impl MessageValidator for ArtifactIdValidator {
    fn name(&self) -> &'static str {
        "artifact-id"
    }

    async fn validate(&self, envelope: &RequestEnvelope) -> Result<()> {
        if let RequestMessage::ArtifactRequest { artifact_id, .. } = &envelope.body {
            if artifact_id.trim().is_empty() {
                return Err(ConnectorError::MalformedMessage(
                    "requested artifact id is missing".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Artifact requests carry a transfer contract id
struct TransferContractValidator;

#[async_trait]
impl MessageValidator for TransferContractValidator {
    fn name(&self) -> &'static str {
        "transfer-contract"
    }

    async fn validate(&self, envelope: &RequestEnvelope) -> Result<()> {
        if let RequestMessage::ArtifactRequest { transfer_contract, .. } = &envelope.body {
            if transfer_contract.is_none() {
                return Err(ConnectorError::MalformedMessage(
                    "transfer contract id is missing".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Every rule of a contract request names a target
struct RuleTargetValidator;

#[async_trait]
impl MessageValidator for RuleTargetValidator {
    fn name(&self) -> &'static str {
        "rule-targets"
    }

    async fn validate(&self, envelope: &RequestEnvelope) -> Result<()> {
        if let RequestMessage::ContractRequest { request } = &envelope.body {
            for rule in request.all_rules() {
                if rule.target.trim().is_empty() {
                    return Err(ConnectorError::MissingTarget(
                        "a rule names no target artifact".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A contract request without rules cannot be negotiated
struct RulesPresentValidator;

#[async_trait]
impl MessageValidator for RulesPresentValidator {
    fn name(&self) -> &'static str {
        "rules-present"
    }

    async fn validate(&self, envelope: &RequestEnvelope) -> Result<()> {
        if let RequestMessage::ContractRequest { request } = &envelope.body {
            if request.all_rules().is_empty() {
                return Err(ConnectorError::MissingRules(
                    "contract request carries no rules".into(),
                ));
            }
        }
        Ok(())
    }
}
