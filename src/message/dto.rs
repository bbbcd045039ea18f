//! Protocol message types
//!
//! Flat tagged unions instead of a builder hierarchy: every message is a
//! header plus one body variant, and serde's tagged representation keeps
//! the wire format explicit. Unknown or missing fields fail
//! deserialization, which the handler maps to a malformed-message
//! rejection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{ContractAgreement, ContractRequest};
use crate::policy::PolicyPattern;
use crate::types::RejectionReason;

/// Common metadata carried by every inbound and outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    pub id: Uuid,
    /// Protocol version the sender speaks.
    pub protocol_version: String,
    /// Identity of the sending connector.
    pub issuer_connector: String,
    pub issued: DateTime<Utc>,
    /// Id of the message this one answers, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl MessageHeader {
    /// Fresh header for an outbound message from this connector.
    pub fn outbound(connector_id: &str, protocol_version: &str, in_reply_to: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            protocol_version: protocol_version.to_string(),
            issuer_connector: connector_id.to_string(),
            issued: Utc::now(),
            correlation_id: in_reply_to,
        }
    }
}

/// Inbound message bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestMessage {
    /// Ask for the connector's self-description.
    Description,
    /// Open a negotiation with the requested rules.
    ContractRequest { request: ContractRequest },
    /// Confirm a previously issued agreement.
    ContractAgreement { agreement: ContractAgreement },
    /// Request artifact data under a signed transfer contract.
    ArtifactRequest {
        #[serde(default)]
        artifact_id: String,
        #[serde(default)]
        transfer_contract: Option<Uuid>,
    },
    /// A resource this connector mirrors was updated at its origin.
    ResourceUpdate { entity_id: String },
}

/// An inbound message: header plus body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub header: MessageHeader,
    pub body: RequestMessage,
}

/// Connector self-description returned on description requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfDescription {
    pub connector_id: String,
    pub version: String,
    pub protocol_version: String,
    /// Policy patterns this connector can enforce.
    pub supported_patterns: Vec<PolicyPattern>,
}

/// Outbound message bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseMessage {
    Description { description: SelfDescription },
    /// The provider's signed (not yet confirmed) agreement.
    ContractAgreement { agreement: ContractAgreement },
    /// Reference to the released artifact data.
    ArtifactResponse {
        artifact_id: String,
        data_ref: String,
    },
    /// Generic acknowledgement for messages without a payload answer.
    MessageProcessed,
    Rejection {
        reason: RejectionReason,
        message: String,
    },
}

/// An outbound message: header plus body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub header: MessageHeader,
    pub body: ResponseMessage,
}

impl ResponseEnvelope {
    pub fn is_rejection(&self) -> bool {
        matches!(self.body, ResponseMessage::Rejection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rule;

    #[test]
    fn test_request_round_trip() {
        let envelope = RequestEnvelope {
            header: MessageHeader::outbound("https://consumer.example", "4.0.0", None),
            body: RequestMessage::ArtifactRequest {
                artifact_id: "artifact-1".into(),
                transfer_contract: Some(Uuid::new_v4()),
            },
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let parsed: RequestEnvelope = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed.body,
            RequestMessage::ArtifactRequest { artifact_id, .. } if artifact_id == "artifact-1"
        ));
    }

    #[test]
    fn test_unknown_message_type_fails_to_parse() {
        let json = r#"{
            "header": {
                "id": "3f6f0be0-89b5-4a39-a216-575d9288fdee",
                "protocol_version": "4.0.0",
                "issuer_connector": "https://consumer.example",
                "issued": "2026-01-01T00:00:00Z"
            },
            "body": { "type": "TELEPORT_REQUEST" }
        }"#;
        assert!(serde_json::from_str::<RequestEnvelope>(json).is_err());
    }

    #[test]
    fn test_contract_request_body_parses() {
        let request = ContractRequest {
            consumer: "https://consumer.example".into(),
            permissions: vec![Rule::permission("artifact-1")],
            prohibitions: vec![],
            obligations: vec![],
            contract_end: None,
        };
        let body = RequestMessage::ContractRequest { request };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("CONTRACT_REQUEST"));
        assert!(serde_json::from_str::<RequestMessage>(&json).is_ok());
    }
}
