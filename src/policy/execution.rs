//! Policy execution point
//!
//! Discharges the side effects a verification run left pending: usage
//! records to the clearing house, duty notifications to rule endpoints,
//! the atomic access-counter commit and the first-access stamp. Runs only
//! after the caller has decided to release data.
//!
//! Duty send failures are non-fatal by default - the access decision
//! stands and the failure is logged for audit. With `strict_duties` a
//! failed logging/notification duty escalates to a policy rejection
//! before any data leaves the connector.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::EnforcementConfig;
use crate::policy::verifier::SideEffect;
use crate::store::EntityStore;
use crate::transport::Notifier;
use crate::types::{ConnectorError, Result};

/// Usage record sent to the clearing house and to notification endpoints
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub target: String,
    pub issuer_connector: String,
    pub timestamp: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement_id: Option<String>,
}

/// Executes pending side effects in order
pub struct PolicyExecutor {
    config: EnforcementConfig,
    store: Arc<dyn EntityStore>,
    notifier: Arc<dyn Notifier>,
}

impl PolicyExecutor {
    pub fn new(
        config: EnforcementConfig,
        store: Arc<dyn EntityStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { config, store, notifier }
    }

    /// Run all pending effects. Duty sends and the first-access stamp
    /// come first; the counter commit runs last, so an access that a
    /// strict-mode duty failure denies never burns one of the granted
    /// slots. The commit can itself fail the access: losing the
    /// compare-and-increment race against a concurrent request on the
    /// last slot converts into a policy rejection.
    pub async fn execute(&self, pending: &[SideEffect], issuer: &str) -> Result<()> {
        for effect in pending {
            if !matches!(effect, SideEffect::IncrementAccessCounter { .. }) {
                self.discharge(effect, issuer).await?;
            }
        }
        for effect in pending {
            if let SideEffect::IncrementAccessCounter { target, max } = effect {
                let committed = self.store.try_increment_access(target, *max).await?;
                match committed {
                    Some(count) => debug!(artifact = %target, count, "access counter committed"),
                    None => {
                        return Err(ConnectorError::PolicyRestriction(format!(
                            "maximum access count reached for {target}"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    async fn discharge(&self, effect: &SideEffect, issuer: &str) -> Result<()> {
        match effect {
            // Handled separately, after every duty went through.
            SideEffect::IncrementAccessCounter { .. } => {}

            SideEffect::RecordFirstAccess { target } => {
                self.store.record_first_access(target, Utc::now()).await?;
            }

            SideEffect::ClearingHouseLog { target, agreement_id } => {
                let record = UsageRecord {
                    target: target.clone(),
                    issuer_connector: issuer.to_string(),
                    timestamp: Utc::now(),
                    agreement_id: Some(agreement_id.clone()),
                };
                let Some(url) = self.config.clearing_house_url.clone() else {
                    warn!(artifact = %target, "no clearing house configured, dropping usage log");
                    return self.fail_duty("clearing house not configured");
                };
                if let Err(err) = self.send_record(&url, &record).await {
                    warn!(artifact = %target, url, %err, "clearing house logging failed");
                    self.fail_duty(&err.to_string())?;
                }
            }

            SideEffect::DutyNotification { endpoint, target } => {
                let record = UsageRecord {
                    target: target.clone(),
                    issuer_connector: issuer.to_string(),
                    timestamp: Utc::now(),
                    agreement_id: None,
                };
                if let Err(err) = self.send_record(endpoint, &record).await {
                    warn!(artifact = %target, endpoint, %err, "duty notification failed");
                    self.fail_duty(&err.to_string())?;
                }
            }
        }
        Ok(())
    }

    async fn send_record(&self, url: &str, record: &UsageRecord) -> Result<()> {
        let body = serde_json::to_vec(record)?;
        let headers = [("content-type".to_string(), "application/json".to_string())];
        let outcome = self.notifier.post(url, &headers, Some(body)).await?;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(ConnectorError::DutyExecution(format!(
                "endpoint {url} answered {outcome:?}"
            )))
        }
    }

    /// In strict mode an undischarged duty denies the access.
    fn fail_duty(&self, reason: &str) -> Result<()> {
        if self.config.strict_duties {
            Err(ConnectorError::PolicyRestriction(format!(
                "duty could not be discharged: {reason}"
            )))
        } else {
            Ok(())
        }
    }
}
