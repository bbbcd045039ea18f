//! Outbound HTTP transport seam
//!
//! Clearing-house logging, duty notification and subscriber push all go
//! through one `Notifier` trait. The outcome type keeps 5xx responses
//! distinguishable from other failures so the fan-out retry logic can
//! discriminate.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::types::{ConnectorError, Result};

/// Result of one outbound POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    /// 2xx response.
    Accepted(u16),
    /// 5xx response; the recipient may recover, retry is worthwhile.
    ServerError(u16),
    /// Any other status; the recipient rejected the request, do not retry.
    Rejected(u16),
}

impl PostOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Accepted(status),
            500..=599 => Self::ServerError(status),
            _ => Self::Rejected(status),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError(_))
    }
}

/// Outbound POST transport
#[async_trait]
pub trait Notifier: Send + Sync {
    /// POST `body` to `url` with the given headers. Connection failures
    /// and timeouts surface as `ConnectorError::Transport`.
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<PostOutcome>;
}

/// Reqwest-backed notifier
pub struct HttpNotifier {
    client: reqwest::Client,
}

impl HttpNotifier {
    /// Create a notifier with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Internal(format!("HTTP client setup: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Option<Vec<u8>>,
    ) -> Result<PostOutcome> {
        let mut request = self.client.post(url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        debug!(url, status, "outbound POST completed");
        Ok(PostOutcome::from_status(status))
    }
}
