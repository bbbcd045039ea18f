//! Policy pattern classification
//!
//! Maps a rule's structured condition to one of the enforceable patterns.
//! Deterministic and pure: the same condition always yields the same
//! pattern. A rule maps to exactly one pattern or classification fails;
//! callers decide whether an unsupported rule rejects the access or is
//! skipped as non-restrictive.

use serde::{Deserialize, Serialize};

use crate::model::{DutyObligation, Rule, RuleKind};
use crate::types::{ConnectorError, Result};

/// Enforceable semantic categories of rule conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyPattern {
    /// Unconditional allow.
    ProvideAccess,
    /// Usage allowed inside an explicit `[start, end)` window.
    UsageDuringInterval,
    /// Usage allowed until a deletion date.
    UsageUntilDeletion,
    /// Usage allowed for a rolling duration from first access.
    DurationUsage,
    /// Every access must be logged to the clearing house.
    UsageLogging,
    /// Usage allowed a bounded number of times.
    NTimesUsage,
    /// Every access must be reported to an endpoint named in the rule.
    UsageNotification,
}

/// The pattern set enforced on provider-side data access.
pub const ENFORCED_ON_ACCESS: [PolicyPattern; 7] = [
    PolicyPattern::ProvideAccess,
    PolicyPattern::UsageDuringInterval,
    PolicyPattern::UsageUntilDeletion,
    PolicyPattern::DurationUsage,
    PolicyPattern::UsageLogging,
    PolicyPattern::NTimesUsage,
    PolicyPattern::UsageNotification,
];

/// Read the properties of a rule to recognize the policy pattern.
///
/// Only permissions map to patterns; prohibitions and standalone duties
/// carry no enforceable shape in this pattern set and fail classification,
/// which denies access under the default configuration. A condition with
/// more than one shape set is ambiguous and also fails.
pub fn recognize_pattern(rule: &Rule) -> Result<PolicyPattern> {
    if rule.kind != RuleKind::Permission {
        return Err(ConnectorError::UnsupportedPattern(format!(
            "{:?} rules have no enforceable pattern",
            rule.kind
        )));
    }

    let condition = &rule.condition;
    if condition.shape_count() > 1 {
        return Err(ConnectorError::UnsupportedPattern(
            "condition mixes multiple constraint shapes".into(),
        ));
    }

    if condition.is_unconditional() {
        return Ok(PolicyPattern::ProvideAccess);
    }
    if condition.interval.is_some() {
        return Ok(PolicyPattern::UsageDuringInterval);
    }
    if condition.deletion_date.is_some() {
        return Ok(PolicyPattern::UsageUntilDeletion);
    }
    if condition.usage_duration_secs.is_some() {
        return Ok(PolicyPattern::DurationUsage);
    }
    if condition.max_count.is_some() {
        return Ok(PolicyPattern::NTimesUsage);
    }
    match &condition.duty {
        Some(DutyObligation::Log) => Ok(PolicyPattern::UsageLogging),
        Some(DutyObligation::Notify { .. }) => Ok(PolicyPattern::UsageNotification),
        None => Err(ConnectorError::UnsupportedPattern(
            "condition shape not recognized".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RuleCondition, TimeInterval};
    use chrono::{Duration, Utc};

    fn rule_with(condition: RuleCondition) -> Rule {
        Rule::permission("artifact-1").with_condition(condition)
    }

    #[test]
    fn test_unconditional_permission_is_provide_access() {
        let rule = Rule::permission("artifact-1");
        assert_eq!(recognize_pattern(&rule).unwrap(), PolicyPattern::ProvideAccess);
    }

    #[test]
    fn test_interval_condition() {
        let now = Utc::now();
        let rule = rule_with(RuleCondition {
            interval: Some(TimeInterval { start: now, end: now + Duration::days(1) }),
            ..Default::default()
        });
        assert_eq!(
            recognize_pattern(&rule).unwrap(),
            PolicyPattern::UsageDuringInterval
        );
    }

    #[test]
    fn test_deletion_date_condition() {
        let rule = rule_with(RuleCondition {
            deletion_date: Some(Utc::now() + Duration::days(30)),
            ..Default::default()
        });
        assert_eq!(
            recognize_pattern(&rule).unwrap(),
            PolicyPattern::UsageUntilDeletion
        );
    }

    #[test]
    fn test_duration_condition() {
        let rule = rule_with(RuleCondition {
            usage_duration_secs: Some(3600),
            ..Default::default()
        });
        assert_eq!(recognize_pattern(&rule).unwrap(), PolicyPattern::DurationUsage);
    }

    #[test]
    fn test_max_count_condition() {
        let rule = rule_with(RuleCondition {
            max_count: Some(5),
            ..Default::default()
        });
        assert_eq!(recognize_pattern(&rule).unwrap(), PolicyPattern::NTimesUsage);
    }

    #[test]
    fn test_logging_duty() {
        let rule = rule_with(RuleCondition {
            duty: Some(DutyObligation::Log),
            ..Default::default()
        });
        assert_eq!(recognize_pattern(&rule).unwrap(), PolicyPattern::UsageLogging);
    }

    #[test]
    fn test_notification_duty() {
        let rule = rule_with(RuleCondition {
            duty: Some(DutyObligation::Notify {
                endpoint: "https://audit.example/usage".into(),
            }),
            ..Default::default()
        });
        assert_eq!(
            recognize_pattern(&rule).unwrap(),
            PolicyPattern::UsageNotification
        );
    }

    #[test]
    fn test_mixed_shapes_are_unsupported() {
        let rule = rule_with(RuleCondition {
            max_count: Some(5),
            duty: Some(DutyObligation::Log),
            ..Default::default()
        });
        assert!(matches!(
            recognize_pattern(&rule),
            Err(ConnectorError::UnsupportedPattern(_))
        ));
    }

    #[test]
    fn test_prohibition_is_unsupported() {
        let mut rule = Rule::permission("artifact-1");
        rule.kind = RuleKind::Prohibition;
        assert!(matches!(
            recognize_pattern(&rule),
            Err(ConnectorError::UnsupportedPattern(_))
        ));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let rule = rule_with(RuleCondition {
            max_count: Some(2),
            ..Default::default()
        });
        let first = recognize_pattern(&rule).unwrap();
        let second = recognize_pattern(&rule).unwrap();
        assert_eq!(first, second);
    }
}
