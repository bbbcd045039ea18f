//! Configuration for Covenant
//!
//! CLI arguments and environment variable handling using clap. The
//! enforcement-relevant subset is copied into an explicit
//! `EnforcementConfig` struct that is injected into the contract manager
//! and verifier; the engine never reads ambient global state.

use clap::Parser;
use uuid::Uuid;

/// Covenant - usage-control connector core
#[derive(Parser, Debug, Clone)]
#[command(name = "covenant")]
#[command(about = "Contract negotiation and usage-control enforcement for data exchange")]
pub struct Args {
    /// Unique node identifier for this connector instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Connector identity stamped on rules as assigner/assignee
    #[arg(long, env = "CONNECTOR_ID", default_value = "https://covenant.localhost")]
    pub connector_id: String,

    /// Highest inbound protocol version this connector accepts
    #[arg(long, env = "PROTOCOL_VERSION", default_value = "4.0.0")]
    pub protocol_version: String,

    /// Clearing-house endpoint for usage-logging duties
    #[arg(long, env = "CLEARING_HOUSE_URL")]
    pub clearing_house_url: Option<String>,

    /// Treat rules with unrecognized conditions as non-restrictive
    /// instead of denying access
    #[arg(long, env = "ALLOW_UNSUPPORTED_PATTERNS", default_value = "false")]
    pub allow_unsupported_patterns: bool,

    /// Deny access when a logging/notification duty cannot be discharged
    #[arg(long, env = "STRICT_DUTIES", default_value = "false")]
    pub strict_duties: bool,

    /// Reject all inbound messages (maintenance mode)
    #[arg(long, env = "OFFLINE", default_value = "false")]
    pub offline: bool,

    /// Outbound HTTP request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Maximum concurrent subscriber deliveries
    #[arg(long, env = "FANOUT_CONCURRENCY", default_value = "8")]
    pub fanout_concurrency: usize,

    /// Retry attempts per subscriber delivery on 5xx responses
    #[arg(long, env = "FANOUT_RETRIES", default_value = "5")]
    pub fanout_retries: u32,

    /// Delay between subscriber delivery retries in milliseconds
    #[arg(long, env = "FANOUT_RETRY_DELAY_MS", default_value = "5000")]
    pub fanout_retry_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<(), String> {
        if self.connector_id.trim().is_empty() {
            return Err("connector id must not be empty".into());
        }
        if self.fanout_concurrency == 0 {
            return Err("fanout concurrency must be at least 1".into());
        }
        if self.request_timeout_ms == 0 {
            return Err("request timeout must be positive".into());
        }
        Ok(())
    }

    /// Extract the enforcement-relevant subset.
    pub fn enforcement_config(&self) -> EnforcementConfig {
        EnforcementConfig {
            connector_id: self.connector_id.clone(),
            protocol_version: self.protocol_version.clone(),
            clearing_house_url: self.clearing_house_url.clone(),
            allow_unsupported_patterns: self.allow_unsupported_patterns,
            strict_duties: self.strict_duties,
            offline: self.offline,
        }
    }
}

/// Explicit configuration handed to the contract manager and verifier
#[derive(Debug, Clone)]
pub struct EnforcementConfig {
    /// Local connector identity.
    pub connector_id: String,
    /// Supported protocol version for inbound messages.
    pub protocol_version: String,
    /// Clearing-house endpoint for usage-logging duties.
    pub clearing_house_url: Option<String>,
    /// Skip rules with unrecognized conditions instead of denying.
    pub allow_unsupported_patterns: bool,
    /// Escalate failed logging/notification duties to access denial.
    pub strict_duties: bool,
    /// Connector rejects all inbound traffic when offline.
    pub offline: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            connector_id: "https://covenant.localhost".to_string(),
            protocol_version: "4.0.0".to_string(),
            clearing_house_url: None,
            allow_unsupported_patterns: false,
            strict_duties: false,
            offline: false,
        }
    }
}
