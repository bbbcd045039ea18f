//! Usage-control verification
//!
//! Re-runs on every access attempt: every rule attached to the governing
//! agreement and targeting the requested artifact is classified and
//! evaluated. Rules are conjunctive - one denial denies the whole
//! request. Evaluation itself mutates nothing; it returns a verdict plus
//! the ordered side effects (log sends, notifications, counter commit)
//! the caller must execute before releasing data.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::EnforcementConfig;
use crate::model::{ContractAgreement, DutyObligation, Rule};
use crate::policy::pattern::{recognize_pattern, PolicyPattern, ENFORCED_ON_ACCESS};
use crate::store::EntityStore;
use crate::types::Result;

/// Access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

/// Side effect pending execution once the caller commits to the access
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Send a usage record to the clearing house.
    ClearingHouseLog { target: String, agreement_id: String },
    /// Send a usage record to the endpoint named in the rule's duty.
    DutyNotification { endpoint: String, target: String },
    /// Commit one access against the artifact's counter, bounded by the
    /// rule's maximum.
    IncrementAccessCounter { target: String, max: u64 },
    /// Persist the first-access timestamp for duration-bound rules.
    RecordFirstAccess { target: String },
}

/// Verdict of one verification run
#[derive(Debug)]
pub struct Verdict {
    pub decision: Decision,
    /// Ordered side effects; empty when denied.
    pub pending: Vec<SideEffect>,
}

impl Verdict {
    fn denied() -> Self {
        Self { decision: Decision::Denied, pending: Vec::new() }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allowed
    }
}

/// Policy decision point for data access
pub struct UsageControlVerifier {
    config: EnforcementConfig,
    store: Arc<dyn EntityStore>,
}

impl UsageControlVerifier {
    pub fn new(config: EnforcementConfig, store: Arc<dyn EntityStore>) -> Self {
        Self { config, store }
    }

    /// Evaluate every rule on `agreement` targeting `artifact_id`.
    ///
    /// An unsupported pattern denies the request unless the configuration
    /// allows unsupported patterns, in which case the rule is skipped as
    /// non-restrictive.
    pub async fn verify(&self, artifact_id: &str, agreement: &ContractAgreement) -> Result<Verdict> {
        let now = Utc::now();
        let rules = agreement.rules_for_target(artifact_id);
        let mut pending = Vec::new();

        for rule in rules {
            let pattern = match recognize_pattern(rule) {
                Ok(pattern) => pattern,
                Err(err) => {
                    if self.config.allow_unsupported_patterns {
                        debug!(artifact_id, %err, "skipping rule with unsupported pattern");
                        continue;
                    }
                    warn!(artifact_id, %err, "denying access for unsupported pattern");
                    return Ok(Verdict::denied());
                }
            };

            // Enforce only the provider-side pattern subset.
            if !ENFORCED_ON_ACCESS.contains(&pattern) {
                continue;
            }

            let allowed = self
                .evaluate_rule(pattern, rule, artifact_id, agreement, now, &mut pending)
                .await?;
            if !allowed {
                debug!(artifact_id, ?pattern, "access denied by rule evaluation");
                return Ok(Verdict::denied());
            }
        }

        Ok(Verdict { decision: Decision::Allowed, pending })
    }

    async fn evaluate_rule(
        &self,
        pattern: PolicyPattern,
        rule: &Rule,
        artifact_id: &str,
        agreement: &ContractAgreement,
        now: DateTime<Utc>,
        pending: &mut Vec<SideEffect>,
    ) -> Result<bool> {
        match pattern {
            PolicyPattern::ProvideAccess => Ok(true),

            PolicyPattern::UsageDuringInterval => {
                let inside = rule
                    .condition
                    .interval
                    .map(|interval| interval.contains(now))
                    .unwrap_or(false);
                Ok(inside)
            }

            PolicyPattern::UsageUntilDeletion => {
                let before = rule
                    .condition
                    .deletion_date
                    .map(|deadline| now <= deadline)
                    .unwrap_or(false);
                Ok(before)
            }

            PolicyPattern::DurationUsage => {
                let secs = rule.condition.usage_duration_secs.unwrap_or(0);
                let artifact = self.store.get_artifact(artifact_id).await?;
                match artifact.first_access {
                    // First access: the window opens once the caller
                    // commits, so the timestamp is a pending effect.
                    None => {
                        pending.push(SideEffect::RecordFirstAccess {
                            target: artifact_id.to_string(),
                        });
                        Ok(true)
                    }
                    Some(first) => Ok(now - first <= Duration::seconds(secs as i64)),
                }
            }

            PolicyPattern::NTimesUsage => {
                let max = rule.condition.max_count.unwrap_or(0);
                let artifact = self.store.get_artifact(artifact_id).await?;
                if artifact.num_accessed < max {
                    // The counter is committed only after the caller
                    // decides to release data, through the store's atomic
                    // compare-and-increment.
                    pending.push(SideEffect::IncrementAccessCounter {
                        target: artifact_id.to_string(),
                        max,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }

            PolicyPattern::UsageLogging => {
                pending.push(SideEffect::ClearingHouseLog {
                    target: artifact_id.to_string(),
                    agreement_id: agreement.id.to_string(),
                });
                Ok(true)
            }

            PolicyPattern::UsageNotification => {
                if let Some(DutyObligation::Notify { endpoint }) = &rule.condition.duty {
                    pending.push(SideEffect::DutyNotification {
                        endpoint: endpoint.clone(),
                        target: artifact_id.to_string(),
                    });
                }
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Artifact, RuleCondition, RuleKind, TimeInterval};
    use crate::store::InMemoryStore;
    use uuid::Uuid;

    fn agreement_with(rules: Vec<Rule>) -> ContractAgreement {
        let now = Utc::now();
        ContractAgreement {
            id: Uuid::new_v4(),
            provider: "https://provider.example".into(),
            consumer: "https://consumer.example".into(),
            rules,
            contract_date: now,
            contract_start: now,
            contract_end: now + Duration::days(30),
            confirmed: true,
            archived: false,
        }
    }

    fn verifier(config: EnforcementConfig) -> (UsageControlVerifier, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.insert_artifact(Artifact::new("artifact-1"));
        (UsageControlVerifier::new(config, store.clone()), store)
    }

    #[tokio::test]
    async fn test_provide_access_is_always_allowed() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let agreement = agreement_with(vec![Rule::permission("artifact-1")]);

        let verdict = verifier.verify("artifact-1", &agreement).await.unwrap();
        assert!(verdict.is_allowed());
        assert!(verdict.pending.is_empty());
    }

    #[tokio::test]
    async fn test_interval_boundaries() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let now = Utc::now();

        let inside = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                interval: Some(TimeInterval {
                    start: now - Duration::hours(1),
                    end: now + Duration::hours(1),
                }),
                ..Default::default()
            },
        )]);
        assert!(verifier.verify("artifact-1", &inside).await.unwrap().is_allowed());

        let ended = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                interval: Some(TimeInterval {
                    start: now - Duration::hours(2),
                    end: now - Duration::hours(1),
                }),
                ..Default::default()
            },
        )]);
        assert_eq!(
            verifier.verify("artifact-1", &ended).await.unwrap().decision,
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn test_deletion_date_bound() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let future = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                deletion_date: Some(Utc::now() + Duration::days(7)),
                ..Default::default()
            },
        )]);
        assert!(verifier.verify("artifact-1", &future).await.unwrap().is_allowed());

        let past = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                deletion_date: Some(Utc::now() - Duration::days(1)),
                ..Default::default()
            },
        )]);
        assert_eq!(
            verifier.verify("artifact-1", &past).await.unwrap().decision,
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn test_n_times_usage_pends_counter_commit() {
        let (verifier, store) = verifier(EnforcementConfig::default());
        let agreement = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                max_count: Some(2),
                ..Default::default()
            },
        )]);

        let verdict = verifier.verify("artifact-1", &agreement).await.unwrap();
        assert!(verdict.is_allowed());
        assert_eq!(
            verdict.pending,
            vec![SideEffect::IncrementAccessCounter {
                target: "artifact-1".into(),
                max: 2
            }]
        );
        // Verification alone never mutates the counter.
        assert_eq!(store.get_artifact("artifact-1").await.unwrap().num_accessed, 0);
    }

    #[tokio::test]
    async fn test_n_times_usage_denies_at_max() {
        let (verifier, store) = verifier(EnforcementConfig::default());
        store.try_increment_access("artifact-1", 2).await.unwrap();
        store.try_increment_access("artifact-1", 2).await.unwrap();

        let agreement = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                max_count: Some(2),
                ..Default::default()
            },
        )]);
        assert_eq!(
            verifier.verify("artifact-1", &agreement).await.unwrap().decision,
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn test_duration_usage_window() {
        let (verifier, store) = verifier(EnforcementConfig::default());
        let agreement = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                usage_duration_secs: Some(3600),
                ..Default::default()
            },
        )]);

        // First access opens the window via a pending effect.
        let verdict = verifier.verify("artifact-1", &agreement).await.unwrap();
        assert!(verdict.is_allowed());
        assert_eq!(
            verdict.pending,
            vec![SideEffect::RecordFirstAccess { target: "artifact-1".into() }]
        );

        // Within the window.
        store
            .record_first_access("artifact-1", Utc::now() - Duration::minutes(30))
            .await
            .unwrap();
        assert!(verifier.verify("artifact-1", &agreement).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_duration_usage_expired() {
        let (verifier, store) = verifier(EnforcementConfig::default());
        store
            .record_first_access("artifact-1", Utc::now() - Duration::hours(2))
            .await
            .unwrap();

        let agreement = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                usage_duration_secs: Some(3600),
                ..Default::default()
            },
        )]);
        assert_eq!(
            verifier.verify("artifact-1", &agreement).await.unwrap().decision,
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn test_logging_duty_is_allowed_with_side_effect() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let agreement = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                duty: Some(DutyObligation::Log),
                ..Default::default()
            },
        )]);

        let verdict = verifier.verify("artifact-1", &agreement).await.unwrap();
        assert!(verdict.is_allowed());
        assert!(matches!(
            verdict.pending.as_slice(),
            [SideEffect::ClearingHouseLog { .. }]
        ));
    }

    #[tokio::test]
    async fn test_notification_duty_carries_endpoint() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let agreement = agreement_with(vec![Rule::permission("artifact-1").with_condition(
            RuleCondition {
                duty: Some(DutyObligation::Notify {
                    endpoint: "https://audit.example/usage".into(),
                }),
                ..Default::default()
            },
        )]);

        let verdict = verifier.verify("artifact-1", &agreement).await.unwrap();
        assert!(verdict.is_allowed());
        assert_eq!(
            verdict.pending,
            vec![SideEffect::DutyNotification {
                endpoint: "https://audit.example/usage".into(),
                target: "artifact-1".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_rules_are_conjunctive() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let now = Utc::now();
        let agreement = agreement_with(vec![
            Rule::permission("artifact-1"),
            Rule::permission("artifact-1").with_condition(RuleCondition {
                interval: Some(TimeInterval {
                    start: now - Duration::hours(2),
                    end: now - Duration::hours(1),
                }),
                ..Default::default()
            }),
        ]);
        // The unconditional rule allows, but the expired interval denies all.
        assert_eq!(
            verifier.verify("artifact-1", &agreement).await.unwrap().decision,
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn test_unsupported_pattern_denies_by_default() {
        let (verifier, _) = verifier(EnforcementConfig::default());
        let mut prohibition = Rule::permission("artifact-1");
        prohibition.kind = RuleKind::Prohibition;
        let agreement = agreement_with(vec![prohibition]);

        assert_eq!(
            verifier.verify("artifact-1", &agreement).await.unwrap().decision,
            Decision::Denied
        );
    }

    #[tokio::test]
    async fn test_unsupported_pattern_skipped_when_allowed() {
        let config = EnforcementConfig {
            allow_unsupported_patterns: true,
            ..Default::default()
        };
        let (verifier, _) = verifier(config);
        let mut prohibition = Rule::permission("artifact-1");
        prohibition.kind = RuleKind::Prohibition;
        let agreement = agreement_with(vec![prohibition, Rule::permission("artifact-1")]);

        assert!(verifier.verify("artifact-1", &agreement).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_rules_for_other_targets_are_ignored() {
        let (verifier, store) = verifier(EnforcementConfig::default());
        store.insert_artifact(Artifact::new("artifact-2"));
        let now = Utc::now();
        let agreement = agreement_with(vec![
            Rule::permission("artifact-1"),
            // Expired rule, but for a different artifact.
            Rule::permission("artifact-2").with_condition(RuleCondition {
                interval: Some(TimeInterval {
                    start: now - Duration::hours(2),
                    end: now - Duration::hours(1),
                }),
                ..Default::default()
            }),
        ]);

        assert!(verifier.verify("artifact-1", &agreement).await.unwrap().is_allowed());
    }
}
