//! Policy rules and their structured conditions
//!
//! A rule is a single policy statement bound to one target artifact. Its
//! condition is fully structured - there is no free-form constraint
//! parsing here, the message codec hands us typed conditions. Semantic
//! equality between rules is computed over a canonical serialized form
//! that excludes assignment and signature fields, so the same logical
//! rule matches regardless of who stamped it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a policy rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Permission,
    Prohibition,
    Duty,
}

/// Half-open time window `[start, end)` for interval-bound usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Check whether `now` falls inside the window.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now < self.end
    }
}

/// Obligation attached to a permission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum DutyObligation {
    /// Send a usage record to the clearing house on every access.
    Log,
    /// Send a usage record to the given endpoint on every access.
    Notify { endpoint: String },
}

/// Structured usage condition of a rule
///
/// At most one field may be set for the rule to map to an enforceable
/// pattern; mixed shapes are rejected by the classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Explicit usage window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<TimeInterval>,

    /// Usage allowed until this date, after which the data must be deleted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_date: Option<DateTime<Utc>>,

    /// Rolling usage duration in seconds, measured from first access.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_duration_secs: Option<u64>,

    /// Maximum number of accesses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,

    /// Attached logging or notification duty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duty: Option<DutyObligation>,
}

impl RuleCondition {
    /// True when no constraint and no duty is present.
    pub fn is_unconditional(&self) -> bool {
        self.interval.is_none()
            && self.deletion_date.is_none()
            && self.usage_duration_secs.is_none()
            && self.max_count.is_none()
            && self.duty.is_none()
    }

    /// Number of condition fields that are set.
    pub fn shape_count(&self) -> usize {
        [
            self.interval.is_some(),
            self.deletion_date.is_some(),
            self.usage_duration_secs.is_some(),
            self.max_count.is_some(),
            self.duty.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// A single policy rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Kind of the rule.
    pub kind: RuleKind,
    /// Target artifact identifier.
    pub target: String,
    /// Identity that granted the rule (provider side). Stamped during
    /// agreement building, ignored for semantic equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigner: Option<String>,
    /// Identity the rule is granted to (consumer side). Stamped during
    /// request building, ignored for semantic equality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Optional human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Structured usage condition.
    #[serde(default)]
    pub condition: RuleCondition,
    /// Vendor extension fields. Replaces dynamic property reflection on
    /// protocol objects with one explicit map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_properties: BTreeMap<String, String>,
}

impl Rule {
    /// Create an unconditional permission for a target.
    pub fn permission(target: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Permission,
            target: target.into(),
            assigner: None,
            assignee: None,
            title: None,
            condition: RuleCondition::default(),
            additional_properties: BTreeMap::new(),
        }
    }

    /// Attach a condition.
    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.condition = condition;
        self
    }

    /// Set a vendor extension property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.additional_properties.insert(key.into(), value.into());
    }

    /// Canonical serialized form used for semantic equality and signature
    /// checks. Covers kind, target and condition only; assigner, assignee,
    /// title and extension properties are excluded.
    pub fn canonical_form(&self) -> String {
        // BTreeMap keys keep the output stable across field insertion order.
        let canonical = serde_json::json!({
            "kind": self.kind,
            "target": self.target,
            "condition": self.condition,
        });
        canonical.to_string()
    }

    /// Semantic equality: kind, target and condition match.
    pub fn same_policy(&self, other: &Rule) -> bool {
        self.kind == other.kind
            && self.target == other.target
            && self.condition == other.condition
    }
}
