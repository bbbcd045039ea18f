//! Shared types for Covenant

pub mod error;

pub use error::{ConnectorError, RejectionReason, Result};
