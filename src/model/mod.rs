//! Domain model for contracts and usage control
//!
//! Rules, offers, requests and agreements mirror the negotiation life
//! cycle: a provider publishes offers, a consumer sends a request, and a
//! matched request becomes a signed agreement that gates every later
//! artifact access.

pub mod artifact;
pub mod contract;
pub mod rule;
pub mod subscription;

pub use artifact::Artifact;
pub use contract::{partition_rules, ContractAgreement, ContractOffer, ContractRequest};
pub use rule::{DutyObligation, Rule, RuleCondition, RuleKind, TimeInterval};
pub use subscription::{DeliveryMode, Subscription};
