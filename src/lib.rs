//! Covenant - contract negotiation and usage-control enforcement
//!
//! The connector core of a sovereign data exchange: providers publish
//! contract offers, consumers negotiate agreements over them, and every
//! artifact access is re-verified against the signed agreement before
//! data is released.
//!
//! ## Components
//!
//! - **Policy**: pattern classifier, rule matcher, contract manager,
//!   usage-control verifier and side-effect executor
//! - **Message**: typed protocol messages, ordered validation pipelines
//!   and the inbound dispatch handler
//! - **Notify**: subscriber fan-out with bounded concurrency and retry
//! - **Store**: entity store seam with an in-memory implementation
//! - **Transport**: outbound HTTP seam for clearing house, duties and
//!   subscriber deliveries

pub mod config;
pub mod message;
pub mod model;
pub mod notify;
pub mod policy;
pub mod store;
pub mod transport;
pub mod types;

pub use config::Args;
pub use message::MessageHandler;
pub use types::{ConnectorError, Result};
