//! Contract negotiation and usage-control enforcement
//!
//! The policy engine has four layers:
//! - pattern classification maps a rule's condition to an enforceable
//!   category
//! - the matcher decides whether a consumer's requested rules are covered
//!   by a provider offer
//! - the contract manager turns matched requests into signed agreements
//!   and gates artifact transfers on them
//! - the verifier re-evaluates every rule on each access attempt and
//!   hands pending side effects (log, notify, count) to the executor

pub mod contract;
pub mod execution;
pub mod matcher;
pub mod pattern;
pub mod verifier;

pub use contract::ContractManager;
pub use execution::PolicyExecutor;
pub use matcher::{find_matching_offer, rules_match, MatchOutcome};
pub use pattern::{recognize_pattern, PolicyPattern, ENFORCED_ON_ACCESS};
pub use verifier::{Decision, SideEffect, UsageControlVerifier, Verdict};
